// src/config.rs
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::{Path, PathBuf};

/// Environment variable naming an optional JSON config file.
pub const CONFIG_ENV: &str = "CLASSIFIER_CONFIG";

/// Largest accepted side length for the model input image.
pub const MAX_IMAGE_SIDE: usize = 4096;

/// The only origin allowed to call the HTTP surface from a browser.
pub const ALLOWED_ORIGIN: &str = "http://localhost:3000";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("I/O error reading config {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid image_size {width}x{height}: each side must be in 1..={max}")]
    ImageSize {
        width: usize,
        height: usize,
        max: usize,
    },
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize {
    pub height: usize,
    pub width: usize,
}

impl ImageSize {
    pub fn validate(self) -> Result<Self, ConfigError> {
        let in_range = |side: usize| (1..=MAX_IMAGE_SIDE).contains(&side);
        if in_range(self.width) && in_range(self.height) {
            Ok(self)
        } else {
            Err(ConfigError::ImageSize {
                width: self.width,
                height: self.height,
                max: MAX_IMAGE_SIDE,
            })
        }
    }
}

impl Default for ImageSize {
    fn default() -> Self {
        Self {
            height: 224,
            width: 224,
        }
    }
}

/// Tensor names declared by the model artifact.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ModelSignature {
    pub input_name: String,
    pub output_name: String,
}

impl Default for ModelSignature {
    fn default() -> Self {
        Self {
            input_name: "input".to_string(),
            output_name: "output".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub http_addr: SocketAddr,
    /// `None` disables the gRPC listener.
    pub grpc_addr: Option<SocketAddr>,
    pub model_path: PathBuf,
    pub labels_path: PathBuf,
    pub signature: ModelSignature,
    pub image_size: ImageSize,
    pub body_limit_bytes: usize,
    pub inference_timeout_ms: Option<u64>,
    /// Total time allowed for downloading a gRPC `image_url`.
    pub fetch_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 5000)),
            grpc_addr: Some(SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::UNSPECIFIED,
                50051,
            ))),
            model_path: PathBuf::from("model/model.onnx"),
            labels_path: PathBuf::from("model/labels.csv"),
            signature: ModelSignature::default(),
            image_size: ImageSize::default(),
            body_limit_bytes: 10 * 1024 * 1024,
            inference_timeout_ms: None,
            fetch_timeout_ms: 10_000,
        }
    }
}

impl ServerConfig {
    /// Reads the file named by `CLASSIFIER_CONFIG`, or falls back to defaults.
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = std::fs::File::open(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_reader(reader)?;
        config.image_size.validate()?;
        Ok(config)
    }

    pub fn fetch_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn inference_timeout(&self) -> Option<std::time::Duration> {
        self.inference_timeout_ms
            .map(std::time::Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_published_model() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr.port(), 5000);
        assert_eq!(config.grpc_addr.map(|a| a.port()), Some(50051));
        assert_eq!(config.image_size, ImageSize { height: 224, width: 224 });
        assert!(config.inference_timeout().is_none());
        assert_eq!(config.fetch_timeout(), std::time::Duration::from_secs(10));
        assert!(config.image_size.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_remaining_defaults() {
        let json = r#"{
            "http_addr": "127.0.0.1:8080",
            "grpc_addr": null,
            "signature": { "output_name": "probabilities" },
            "inference_timeout_ms": 1500
        }"#;
        let config = ServerConfig::from_reader(json.as_bytes()).unwrap();

        assert_eq!(config.http_addr, "127.0.0.1:8080".parse().unwrap());
        assert!(config.grpc_addr.is_none());
        assert_eq!(config.signature.input_name, "input");
        assert_eq!(config.signature.output_name, "probabilities");
        assert_eq!(config.labels_path, PathBuf::from("model/labels.csv"));
        assert_eq!(
            config.inference_timeout(),
            Some(std::time::Duration::from_millis(1500))
        );
    }

    #[test]
    fn zero_or_huge_image_sides_are_rejected() {
        for json in [
            r#"{ "image_size": { "width": 0, "height": 224 } }"#,
            r#"{ "image_size": { "width": 224, "height": 0 } }"#,
            r#"{ "image_size": { "width": 224, "height": 100000 } }"#,
        ] {
            let err = ServerConfig::from_reader(json.as_bytes()).unwrap_err();
            assert!(matches!(err, ConfigError::ImageSize { .. }), "{json}");
        }
        let ok = ServerConfig::from_reader(&br#"{ "image_size": { "width": 32, "height": 4096 } }"#[..])
            .unwrap();
        assert_eq!(ok.image_size, ImageSize { height: 4096, width: 32 });
    }

    #[test]
    fn malformed_json_is_rejected() {
        let err = ServerConfig::from_reader(&b"{ not json"[..]).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_reports_the_path() {
        let err = ServerConfig::from_file(Path::new("/nonexistent/classifier.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/classifier.json"));
    }
}

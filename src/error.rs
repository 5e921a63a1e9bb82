//! Application-wide error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("rag error: {0}")]
    Rag(String),

    #[error("analysis failed: {0}")]
    Analyze(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_carry_their_prefix() {
        let cases = [
            (AppError::Config("[analysis] top_k must be at least 1".into()), "config error: "),
            (AppError::Rag("PINECONE_API_KEY is not set".into()), "rag error: "),
            (AppError::Analyze("provider request timed out".into()), "analysis failed: "),
        ];
        for (err, prefix) in cases {
            let msg = err.to_string();
            assert!(msg.starts_with(prefix), "{msg:?} should start with {prefix:?}");
        }
    }

    #[test]
    fn missing_input_file_surfaces_as_io() {
        fn read(path: &str) -> Result<String, AppError> {
            Ok(std::fs::read_to_string(path)?)
        }
        let err = read("/nonexistent/trouble-shooter/log.txt").unwrap_err();
        assert!(matches!(err, AppError::Io(ref e) if e.kind() == std::io::ErrorKind::NotFound));
    }
}

//! Extracción de texto de los ficheros subidos.

use mime_guess::MimeGuess;

use crate::error::ExtractionError;

/// Colaborador de extracción: bytes del fichero → texto plano.
pub trait TextExtractor: Send + Sync {
    fn extract(
        &self,
        bytes: &[u8],
        content_type: &str,
        filename: &str,
    ) -> Result<String, ExtractionError>;
}

/// Extensiones que se tratan como texto aunque el tipo declarado no lo diga.
const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "rs", "toml", "log", "html", "css", "js", "json", "csv", "xml", "yaml", "yml",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentKind {
    Pdf,
    Text,
    Unknown,
}

/// PDF vía `pdf-extract`; el resto se decodifica como UTF-8.
#[derive(Debug, Default, Clone)]
pub struct DocumentTextExtractor;

impl DocumentTextExtractor {
    fn classify(content_type: &str, filename: &str) -> DocumentKind {
        let declared = content_type.to_lowercase();
        let guessed = MimeGuess::from_path(filename)
            .first()
            .map(|m| m.essence_str().to_string())
            .unwrap_or_default();
        let extension = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default();

        if declared == "application/pdf" || guessed == "application/pdf" {
            DocumentKind::Pdf
        } else if declared.starts_with("text/")
            || guessed.starts_with("text/")
            || TEXT_EXTENSIONS.contains(&extension.as_str())
        {
            DocumentKind::Text
        } else {
            DocumentKind::Unknown
        }
    }
}

impl TextExtractor for DocumentTextExtractor {
    fn extract(
        &self,
        bytes: &[u8],
        content_type: &str,
        filename: &str,
    ) -> Result<String, ExtractionError> {
        match Self::classify(content_type, filename) {
            DocumentKind::Pdf => pdf_extract::extract_text_from_mem(bytes)
                .map_err(|e| ExtractionError::Pdf(e.to_string())),
            DocumentKind::Text => {
                String::from_utf8(bytes.to_vec()).map_err(|_| ExtractionError::InvalidEncoding)
            }
            // Último intento: muchos tipos "octet-stream" son texto en realidad.
            DocumentKind::Unknown => String::from_utf8(bytes.to_vec())
                .map_err(|_| ExtractionError::Unsupported(content_type.to_string())),
        }
    }
}

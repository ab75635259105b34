//! Report rendering: survey payload in, PDF artifact out.

pub mod pdf;
pub mod report;

pub use pdf::PdfRenderer;

use crate::model::{phone_digits, SurveyData};
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("wkhtmltopdf not available: {0}")]
    MissingBinary(String),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to launch wkhtmltopdf: {0}")]
    Launch(#[source] std::io::Error),
    #[error("wkhtmltopdf exited with {status}: {stderr}")]
    Converter { status: String, stderr: String },
    #[error("{0}")]
    Other(String),
}

/// A rendered report on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    /// Slug of the customer name; attachments are named `Relatorio_{display_name}.pdf`.
    pub display_name: String,
}

impl Artifact {
    pub fn file_name(&self) -> String {
        format!("Relatorio_{}.pdf", self.display_name)
    }
}

#[async_trait]
pub trait RenderService: Send + Sync {
    async fn render(&self, survey: &SurveyData) -> Result<Artifact, RenderError>;
}

/// Lower-case ASCII slug with `_` separators, dropping anything else.
pub fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for ch in name.chars().flat_map(char::to_lowercase).map(fold_accent) {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(ch);
        } else if ch.is_whitespace() || ch == '-' || ch == '_' {
            pending_sep = true;
        }
    }
    if out.is_empty() {
        "cliente".to_string()
    } else {
        out
    }
}

fn fold_accent(ch: char) -> char {
    match ch {
        'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'ç' => 'c',
        'ñ' => 'n',
        other => other,
    }
}

/// Brazilian phone display: `(DD) DDDD-DDDD` or `(DD) 9 DDDD-DDDD`; anything else is returned as given.
pub fn format_phone_for_report(phone: &str) -> String {
    let mut raw = phone_digits(phone);
    if raw.len() == 11 && raw.starts_with("55") {
        raw = raw[2..].to_string();
    }
    match raw.len() {
        10 => format!("({}) {}-{}", &raw[..2], &raw[2..6], &raw[6..]),
        11 => format!("({}) 9 {}-{}", &raw[..2], &raw[3..7], &raw[7..]),
        _ => phone.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_strips_accents_and_punctuation() {
        assert_eq!(slugify("João da Silva"), "joao_da_silva");
        assert_eq!(slugify("  Ana  Lúcia!! "), "ana_lucia");
        assert_eq!(slugify("Conceição-Araújo"), "conceicao_araujo");
        assert_eq!(slugify("???"), "cliente");
    }

    #[test]
    fn phone_formats() {
        assert_eq!(format_phone_for_report("1133334444"), "(11) 3333-4444");
        assert_eq!(format_phone_for_report("(11) 99999-8888"), "(11) 9 9999-8888");
        assert_eq!(format_phone_for_report("123"), "123");
    }

    #[test]
    fn artifact_file_name() {
        let artifact = Artifact {
            path: PathBuf::from("/tmp/Relatorio_ana.pdf"),
            display_name: "ana".into(),
        };
        assert_eq!(artifact.file_name(), "Relatorio_ana.pdf");
    }
}

use super::report::render_html;
use super::{slugify, Artifact, RenderError, RenderService};
use crate::model::{local_offset, SurveyData};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Renders reports by piping generated HTML through `wkhtmltopdf`.
#[derive(Debug, Clone)]
pub struct PdfRenderer {
    output_dir: PathBuf,
    wkhtmltopdf: PathBuf,
}

impl PdfRenderer {
    /// Use `binary` when given, otherwise look `wkhtmltopdf` up on PATH.
    pub fn new(output_dir: impl Into<PathBuf>, binary: Option<&str>) -> Result<Self, RenderError> {
        let wkhtmltopdf = match binary {
            Some(path) => PathBuf::from(path),
            None => which::which("wkhtmltopdf")
                .map_err(|err| RenderError::MissingBinary(err.to_string()))?,
        };
        Ok(Self {
            output_dir: output_dir.into(),
            wkhtmltopdf,
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    async fn convert(&self, html_path: &Path, pdf_path: &Path) -> Result<(), RenderError> {
        let output = Command::new(&self.wkhtmltopdf)
            .arg("--quiet")
            .arg("--encoding")
            .arg("utf-8")
            .arg("--page-size")
            .arg("A4")
            .arg("--margin-top")
            .arg("10mm")
            .arg("--margin-bottom")
            .arg("10mm")
            .arg("--margin-left")
            .arg("10mm")
            .arg("--margin-right")
            .arg("10mm")
            .arg("--enable-local-file-access")
            .arg("--print-media-type")
            .arg(html_path)
            .arg(pdf_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(RenderError::Launch)?;

        if !output.status.success() {
            return Err(RenderError::Converter {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Removes the intermediate HTML file when dropped.
struct TempHtml(PathBuf);

impl Drop for TempHtml {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

#[async_trait]
impl RenderService for PdfRenderer {
    async fn render(&self, survey: &SurveyData) -> Result<Artifact, RenderError> {
        let display_name = slugify(&survey.customer.name);
        let today = Utc::now().with_timezone(&local_offset()).date_naive();

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|source| RenderError::Io {
                path: self.output_dir.clone(),
                source,
            })?;

        let html_path = self.output_dir.join(format!(".Relatorio_{display_name}.html"));
        let pdf_path = self.output_dir.join(format!("Relatorio_{display_name}.pdf"));

        tokio::fs::write(&html_path, render_html(survey, today))
            .await
            .map_err(|source| RenderError::Io {
                path: html_path.clone(),
                source,
            })?;
        let _cleanup = TempHtml(html_path.clone());

        debug!(html = %html_path.display(), "converting report");
        self.convert(&html_path, &pdf_path).await?;
        info!(pdf = %pdf_path.display(), "report rendered");

        Ok(Artifact {
            path: pdf_path,
            display_name,
        })
    }
}

//! Page Rasterizer: render every page of a PDF to an image at a fixed DPI.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and is CPU-heavy. [`render_pages`] moves the work onto Tokio's
//! blocking pool so async workers never stall on a large scan.
//!
//! Any failure here is fatal for the document: a run never continues with
//! a partial page list, because the OCR artifact must have exactly one entry
//! per source page.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::input::PdfSource;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// One rendered page, consumed immediately by recognition.
#[derive(Debug, Clone)]
pub struct RasterPage {
    /// 1-indexed page number.
    pub page: usize,
    pub image: DynamicImage,
}

/// Converts a PDF into page images, in page order.
///
/// Implementations are synchronous and may block; callers go through
/// [`render_pages`].
pub trait Rasterizer: Send + Sync + 'static {
    fn rasterize(&self, source: &PdfSource) -> Result<Vec<RasterPage>, PipelineError>;
}

/// Run a rasterizer on the blocking pool.
pub async fn render_pages(
    rasterizer: Arc<dyn Rasterizer>,
    source: PdfSource,
) -> Result<Vec<RasterPage>, PipelineError> {
    tokio::task::spawn_blocking(move || rasterizer.rasterize(&source))
        .await
        .map_err(|e| PipelineError::Internal(format!("Render task panicked: {}", e)))?
}

/// pdfium-backed rasterizer.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    dpi: u32,
    max_pixels: u32,
    password: Option<String>,
    library: Option<PathBuf>,
}

impl PdfiumRasterizer {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            dpi: config.dpi,
            max_pixels: config.max_rendered_pixels,
            password: config.password.clone(),
            library: config.pdfium_library.clone(),
        }
    }

    fn bind(&self) -> Result<Pdfium, PipelineError> {
        let explicit = self
            .library
            .clone()
            .or_else(|| std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from));

        let bindings = match explicit {
            Some(path) => Pdfium::bind_to_library(&path).map_err(|e| {
                PipelineError::PdfiumBindingFailed(format!("{}: {:?}", path.display(), e))
            })?,
            None => Pdfium::bind_to_system_library()
                .map_err(|e| PipelineError::PdfiumBindingFailed(format!("{:?}", e)))?,
        };
        Ok(Pdfium::new(bindings))
    }

    fn render_document(
        &self,
        document: &PdfDocument<'_>,
        name: &str,
    ) -> Result<Vec<RasterPage>, PipelineError> {
        let pages = document.pages();
        let total_pages = pages.len() as usize;
        info!("PDF '{}' loaded: {} pages", name, total_pages);

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(self.dpi as f32 / 72.0)
            .set_maximum_width(self.max_pixels as i32)
            .set_maximum_height(self.max_pixels as i32);

        let mut results = Vec::with_capacity(total_pages);
        for (idx, page) in pages.iter().enumerate() {
            let bitmap = page.render_with_config(&render_config).map_err(|e| {
                PipelineError::RasterisationFailed {
                    page: idx + 1,
                    detail: format!("{:?}", e),
                }
            })?;

            let image = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px",
                idx + 1,
                image.width(),
                image.height()
            );
            results.push(RasterPage {
                page: idx + 1,
                image,
            });
        }

        Ok(results)
    }

    fn load_error(&self, name: &str, e: PdfiumError) -> PipelineError {
        let err_str = format!("{:?}", e);
        if err_str.contains("Password") || err_str.contains("password") {
            if self.password.is_some() {
                PipelineError::WrongPassword {
                    source_name: name.to_string(),
                }
            } else {
                PipelineError::PasswordRequired {
                    source_name: name.to_string(),
                }
            }
        } else {
            PipelineError::CorruptPdf {
                source_name: name.to_string(),
                detail: err_str,
            }
        }
    }
}

impl Rasterizer for PdfiumRasterizer {
    fn rasterize(&self, source: &PdfSource) -> Result<Vec<RasterPage>, PipelineError> {
        let pdfium = self.bind()?;
        let name = source.display_name();
        let password = self.password.as_deref();

        match source {
            PdfSource::Path(path) => {
                let document = pdfium
                    .load_pdf_from_file(path, password)
                    .map_err(|e| self.load_error(&name, e))?;
                self.render_document(&document, &name)
            }
            PdfSource::Bytes { data, .. } => {
                let document = pdfium
                    .load_pdf_from_byte_slice(data, password)
                    .map_err(|e| self.load_error(&name, e))?;
                self.render_document(&document, &name)
            }
        }
    }
}

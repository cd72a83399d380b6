use anyhow::{anyhow, Result};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbaImage};
use pagedeck_core::{ImageFormat, PageImage, Rgba};

#[cfg(feature = "pdf")]
pub use pdfium::{PdfiumDocument, PdfiumDocumentProvider};

/// Scale factor that rasterizes a page of `page_width` points at
/// `target_width` pixels.
fn scale_for_target(page_width: f32, target_width: u32) -> f32 {
    if page_width <= 0.0 || !page_width.is_finite() {
        return 1.0;
    }
    (target_width as f32 / page_width).max(0.01)
}

/// Composites straight-alpha RGBA pixels over an opaque background in place.
fn flatten_onto_background(pixels: &mut [u8], background: Rgba) {
    let [red, green, blue, _] = background.0;
    for chunk in pixels.chunks_exact_mut(4) {
        let alpha = chunk[3] as u16;
        if alpha == 255 {
            continue;
        }
        let inverse = 255 - alpha;
        chunk[0] = ((chunk[0] as u16 * alpha + red as u16 * inverse) / 255) as u8;
        chunk[1] = ((chunk[1] as u16 * alpha + green as u16 * inverse) / 255) as u8;
        chunk[2] = ((chunk[2] as u16 * alpha + blue as u16 * inverse) / 255) as u8;
        chunk[3] = 255;
    }
}

fn encode_bitmap(
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    format: ImageFormat,
) -> Result<PageImage> {
    let image = RgbaImage::from_raw(width, height, pixels)
        .ok_or_else(|| anyhow!("bitmap dimensions do not match pixel buffer"))?;
    let mut bytes = Vec::new();
    match format {
        ImageFormat::Png => {
            PngEncoder::new(&mut bytes).write_image(
                image.as_raw(),
                width,
                height,
                ExtendedColorType::Rgba8,
            )?;
        }
        ImageFormat::Jpeg => {
            let rgb = image::DynamicImage::ImageRgba8(image).to_rgb8();
            JpegEncoder::new(&mut bytes).encode(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)?;
        }
    }
    Ok(PageImage {
        width,
        height,
        format,
        bytes,
    })
}

#[cfg(feature = "pdf")]
mod pdfium {
    use std::convert::TryFrom;
    use std::mem;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use anyhow::{anyhow, Context, Result};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pdfium_render::prelude::*;

    use pagedeck_core::{
        document_id_for_path, DocumentInfo, DocumentProvider, OpenRequest, PageHandle, PageImage,
        PageRenderer, PageSize, RenderOptions,
    };
    use tracing::{instrument, warn};

    use crate::{encode_bitmap, flatten_onto_background, scale_for_target};

    pub struct PdfiumDocumentProvider {
        pdfium: Arc<Pdfium>,
    }

    impl PdfiumDocumentProvider {
        pub fn new() -> Result<Self> {
            let pdfium = match bind_pdfium_from_env() {
                Some(pdfium) => pdfium,
                None => bind_pdfium_default()?,
            };
            Ok(Self {
                pdfium: Arc::new(pdfium),
            })
        }
    }

    #[async_trait]
    impl DocumentProvider for PdfiumDocumentProvider {
        async fn open(&self, request: &OpenRequest) -> Result<Arc<dyn PageRenderer>> {
            let absolute = request
                .path
                .canonicalize()
                .with_context(|| format!("failed to resolve path for {:?}", request.path))?;
            let info = build_document_info(&self.pdfium, &absolute, request.password.as_deref())?;
            Ok(Arc::new(PdfiumDocument {
                inner: Arc::new(DocumentState {
                    pdfium: Arc::clone(&self.pdfium),
                    path: absolute,
                    password: request.password.clone(),
                    info,
                    document: Mutex::new(None),
                }),
            }))
        }
    }

    struct DocumentState {
        pdfium: Arc<Pdfium>,
        path: PathBuf,
        password: Option<String>,
        info: DocumentInfo,
        document: Mutex<Option<PdfDocument<'static>>>,
    }

    impl DocumentState {
        fn open_document(&self) -> Result<PdfDocument<'static>> {
            let document = self
                .pdfium
                .load_pdf_from_file(&self.path, self.password.as_deref())
                .with_context(|| format!("failed to open {:?}", self.path))?;
            // SAFETY: the returned PdfDocument holds a reference to the Pdfium bindings owned by
            // self.pdfium. The document is stored inside self.document and will be dropped before
            // the Pdfium instance because struct fields drop in reverse order of declaration
            // (document follows pdfium). This keeps the reference valid for the lifetime of the
            // cached PdfDocument.
            let document =
                unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };
            Ok(document)
        }

        fn with_document<R, F>(&self, f: F) -> Result<R>
        where
            F: FnOnce(&PdfDocument<'static>) -> Result<R>,
        {
            let mut guard = self.document.lock();
            if guard.is_none() {
                let document = self.open_document()?;
                *guard = Some(document);
            }
            let document = guard.as_ref().expect("document must be loaded");
            f(document)
        }

        fn page_size(&self, page_index: usize) -> Result<PageSize> {
            self.with_document(|document| {
                let index: PdfPageIndex = page_index
                    .try_into()
                    .map_err(|_| anyhow!("page {} is out of supported range", page_index))?;
                let page = document
                    .pages()
                    .get(index)
                    .with_context(|| format!("page {} out of range", page_index))?;
                Ok(PageSize {
                    width: page.width().value,
                    height: page.height().value,
                })
            })
        }

        fn render_page(&self, page_index: usize, options: &RenderOptions) -> Result<PageImage> {
            self.with_document(|document| {
                let index: PdfPageIndex = page_index
                    .try_into()
                    .map_err(|_| anyhow!("page {} is out of supported range", page_index))?;
                let page = document
                    .pages()
                    .get(index)
                    .with_context(|| format!("page {} out of range", page_index))?;

                let scale = scale_for_target(page.width().value, options.target_width);
                let config = PdfRenderConfig::new().scale_page_by_factor(scale);
                let bitmap = page
                    .render_with_config(&config)
                    .with_context(|| format!("failed to render page {}", page_index))?;
                let image = bitmap.as_image().to_rgba8();
                let (width, height) = (image.width(), image.height());
                let mut pixels = image.into_raw();
                flatten_onto_background(&mut pixels, options.background);
                encode_bitmap(width, height, pixels, options.format)
            })
        }
    }

    pub struct PdfiumDocument {
        inner: Arc<DocumentState>,
    }

    #[async_trait]
    impl PageRenderer for PdfiumDocument {
        fn info(&self) -> &DocumentInfo {
            &self.inner.info
        }

        #[instrument(skip(self))]
        async fn open_page(&self, page_index: usize) -> Result<Box<dyn PageHandle>> {
            if page_index >= self.inner.info.page_count {
                return Err(anyhow!("page {} out of range", page_index));
            }
            let size = self.inner.page_size(page_index)?;
            Ok(Box::new(PdfiumPage {
                document: Arc::clone(&self.inner),
                page_index,
                size,
            }))
        }
    }

    /// Pdfium page objects only live inside document-lock scopes, so the
    /// handle re-enters the lock per render and `close` releases nothing.
    struct PdfiumPage {
        document: Arc<DocumentState>,
        page_index: usize,
        size: PageSize,
    }

    #[async_trait]
    impl PageHandle for PdfiumPage {
        fn size(&self) -> PageSize {
            self.size
        }

        async fn render(&self, options: &RenderOptions) -> Result<PageImage> {
            self.document.render_page(self.page_index, options)
        }

        async fn close(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    fn build_document_info(
        pdfium: &Pdfium,
        path: &Path,
        password: Option<&str>,
    ) -> Result<DocumentInfo> {
        let document = pdfium
            .load_pdf_from_file(path, password)
            .with_context(|| format!("failed to open {:?}", path))?;
        let page_count = usize::try_from(document.pages().len()).unwrap_or_default();

        let title = document
            .metadata()
            .get(PdfDocumentMetadataTagType::Title)
            .map(|tag| tag.value().to_owned())
            .filter(|title| !title.is_empty());
        let label = title.unwrap_or_else(|| {
            path.file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("<unknown>")
                .to_owned()
        });

        Ok(DocumentInfo {
            id: document_id_for_path(path),
            page_count,
            label,
        })
    }

    fn bind_pdfium_from_env() -> Option<Pdfium> {
        match std::env::var("PAGEDECK_PDFIUM_LIBRARY_PATH") {
            Ok(path) if !path.is_empty() => match Pdfium::bind_to_library(&path) {
                Ok(bindings) => Some(Pdfium::new(bindings)),
                Err(err) => {
                    warn!("failed to load Pdfium from {}: {}", path, err);
                    None
                }
            },
            _ => None,
        }
    }

    fn bind_pdfium_default() -> Result<Pdfium> {
        let mut errors = Vec::new();

        let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");

        match Pdfium::bind_to_library(&cwd_path) {
            Ok(bindings) => return Ok(Pdfium::new(bindings)),
            Err(err) => {
                errors.push(format!("{}: {}", cwd_path.display(), err));
            }
        }

        match Pdfium::bind_to_system_library() {
            Ok(bindings) => Ok(Pdfium::new(bindings)),
            Err(err) => {
                errors.push(format!("system: {err}"));
                Err(anyhow!(
                    "failed to bind to a pdfium library; ensure it is installed ({})",
                    errors.join(", ")
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_targets_requested_pixel_width() {
        assert!((scale_for_target(612.0, 612) - 1.0).abs() < 1e-6);
        assert!((scale_for_target(612.0, 306) - 0.5).abs() < 1e-6);
        assert_eq!(scale_for_target(0.0, 260), 1.0);
        assert_eq!(scale_for_target(f32::NAN, 260), 1.0);
        assert_eq!(scale_for_target(1_000_000.0, 1), 0.01);
    }

    #[test]
    fn flatten_replaces_transparent_pixels_with_background() {
        let mut pixels = vec![0, 0, 0, 0, 10, 20, 30, 255];
        flatten_onto_background(&mut pixels, Rgba([200, 100, 50, 255]));

        assert_eq!(&pixels[0..4], &[200, 100, 50, 255]);
        assert_eq!(&pixels[4..8], &[10, 20, 30, 255]);
    }

    #[test]
    fn flatten_blends_partial_alpha() {
        let mut pixels = vec![255, 255, 255, 127];
        flatten_onto_background(&mut pixels, Rgba([0, 0, 0, 255]));

        assert_eq!(pixels[3], 255);
        assert!(pixels[0] > 120 && pixels[0] < 135);
    }

    #[test]
    fn encode_emits_png_signature() {
        let image = encode_bitmap(2, 2, vec![255; 16], ImageFormat::Png).unwrap();
        assert_eq!(image.width, 2);
        assert_eq!(image.height, 2);
        assert_eq!(&image.bytes[0..4], &[0x89, b'P', b'N', b'G']);
    }

    #[test]
    fn encode_emits_jpeg_signature() {
        let image = encode_bitmap(2, 2, vec![255; 16], ImageFormat::Jpeg).unwrap();
        assert_eq!(image.format, ImageFormat::Jpeg);
        assert_eq!(&image.bytes[0..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn encode_rejects_mismatched_buffers() {
        assert!(encode_bitmap(4, 4, vec![0; 3], ImageFormat::Png).is_err());
    }
}

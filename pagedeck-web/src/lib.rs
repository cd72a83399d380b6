//! pdf.js interop shim. Mirrors the renderer surface of `pagedeck-core` for
//! browser targets, where rendering always goes through a 2D canvas and the
//! encoded bytes come back via a blob export.
//!
//! Page indices are zero-based on this side of the boundary; pdf.js numbers
//! pages from 1 and the conversion happens in `page_number_for_index`.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShimError {
    #[error("failed to create blob")]
    CreateBlob,
    #[error("failed to read blob")]
    ReadBlob,
    #[error("document load failed: {0}")]
    DocumentLoad(String),
    #[error("page {0} out of range")]
    PageOutOfRange(usize),
    #[error("2d canvas context unavailable")]
    CanvasContext,
    #[error("pdf.js call failed: {0}")]
    Js(String),
}

/// Converts a zero-based page index to pdf.js's one-based page number.
pub fn page_number_for_index(page_index: usize) -> u32 {
    u32::try_from(page_index.saturating_add(1)).unwrap_or(u32::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageDimensions {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone)]
pub enum DocumentSource {
    Url(String),
    Data(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct WebOpenRequest {
    pub source: DocumentSource,
    pub password: Option<String>,
}

impl WebOpenRequest {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            source: DocumentSource::Url(url.into()),
            password: None,
        }
    }

    pub fn from_data(data: Vec<u8>) -> Self {
        Self {
            source: DocumentSource::Data(data),
            password: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderParams {
    pub width: u32,
    pub height: u32,
    pub mime_type: String,
    pub background: String,
}

impl Default for RenderParams {
    fn default() -> Self {
        Self {
            width: 260,
            height: 337,
            mime_type: "image/png".to_owned(),
            background: "#ffffff".to_owned(),
        }
    }
}

#[cfg(target_arch = "wasm32")]
pub use shim::{PdfJsDocument, PdfJsPage};

#[cfg(target_arch = "wasm32")]
mod shim {
    use super::{
        page_number_for_index, DocumentSource, PageDimensions, RenderParams, ShimError,
        WebOpenRequest,
    };

    use wasm_bindgen::closure::Closure;
    use wasm_bindgen::prelude::*;
    use wasm_bindgen::JsCast;
    use wasm_bindgen_futures::JsFuture;

    #[wasm_bindgen]
    extern "C" {
        #[wasm_bindgen(js_namespace = pdfjsLib, js_name = getDocument)]
        fn pdfjs_get_document(parameters: &JsValue) -> PdfLoadingTask;

        type PdfLoadingTask;
        #[wasm_bindgen(method, getter)]
        fn promise(this: &PdfLoadingTask) -> js_sys::Promise;

        type PdfJsDocumentObject;
        #[wasm_bindgen(method, getter, js_name = numPages)]
        fn num_pages(this: &PdfJsDocumentObject) -> u32;
        #[wasm_bindgen(method, js_name = getPage)]
        fn get_page(this: &PdfJsDocumentObject, page_number: u32) -> js_sys::Promise;

        type PdfJsPageObject;
        #[wasm_bindgen(method, js_name = getViewport)]
        fn get_viewport(this: &PdfJsPageObject, parameters: &JsValue) -> PdfJsViewport;
        #[wasm_bindgen(method)]
        fn render(this: &PdfJsPageObject, parameters: &JsValue) -> PdfJsRenderTask;
        #[wasm_bindgen(method)]
        fn cleanup(this: &PdfJsPageObject);

        type PdfJsViewport;
        #[wasm_bindgen(method, getter)]
        fn width(this: &PdfJsViewport) -> f64;
        #[wasm_bindgen(method, getter)]
        fn height(this: &PdfJsViewport) -> f64;

        type PdfJsRenderTask;
        #[wasm_bindgen(method, getter)]
        fn promise(this: &PdfJsRenderTask) -> js_sys::Promise;
    }

    /// A loaded pdf.js document.
    pub struct PdfJsDocument {
        document: PdfJsDocumentObject,
        page_count: usize,
    }

    impl PdfJsDocument {
        pub async fn open(request: &WebOpenRequest) -> Result<Self, ShimError> {
            let parameters = js_sys::Object::new();
            match &request.source {
                DocumentSource::Url(url) => {
                    set_property(&parameters, "url", &JsValue::from_str(url))?;
                }
                DocumentSource::Data(data) => {
                    let bytes = js_sys::Uint8Array::from(data.as_slice());
                    set_property(&parameters, "data", &bytes)?;
                }
            }
            if let Some(password) = &request.password {
                set_property(&parameters, "password", &JsValue::from_str(password))?;
            }

            let task = pdfjs_get_document(&parameters);
            let document = JsFuture::from(task.promise())
                .await
                .map_err(|err| ShimError::DocumentLoad(describe_js(&err)))?;
            let document: PdfJsDocumentObject = document.unchecked_into();
            let page_count = document.num_pages() as usize;
            Ok(Self {
                document,
                page_count,
            })
        }

        pub fn page_count(&self) -> usize {
            self.page_count
        }

        pub async fn open_page(&self, page_index: usize) -> Result<PdfJsPage, ShimError> {
            if page_index >= self.page_count {
                return Err(ShimError::PageOutOfRange(page_index));
            }
            let page = JsFuture::from(self.document.get_page(page_number_for_index(page_index)))
                .await
                .map_err(|err| ShimError::Js(describe_js(&err)))?;
            let page: PdfJsPageObject = page.unchecked_into();
            let viewport = page.get_viewport(&viewport_parameters(1.0)?);
            let size = PageDimensions {
                width: viewport.width(),
                height: viewport.height(),
            };
            Ok(PdfJsPage { page, size })
        }
    }

    /// An open pdf.js page. `close` releases the page's internal resources.
    pub struct PdfJsPage {
        page: PdfJsPageObject,
        size: PageDimensions,
    }

    impl PdfJsPage {
        pub fn size(&self) -> PageDimensions {
            self.size
        }

        /// Rasterizes through a canvas and exports the encoded bytes. pdf.js
        /// only draws into a canvas, so the byte output requires the
        /// canvas-to-blob round trip.
        pub async fn render(&self, params: &RenderParams) -> Result<Vec<u8>, ShimError> {
            let canvas = create_canvas(params.width, params.height)?;
            let context = canvas
                .get_context("2d")
                .map_err(|err| ShimError::Js(describe_js(&err)))?
                .ok_or(ShimError::CanvasContext)?
                .dyn_into::<web_sys::CanvasRenderingContext2d>()
                .map_err(|_| ShimError::CanvasContext)?;

            context.set_fill_style_str(&params.background);
            context.fill_rect(0.0, 0.0, params.width as f64, params.height as f64);

            let scale = if self.size.width > 0.0 {
                params.width as f64 / self.size.width
            } else {
                1.0
            };
            let viewport = self.page.get_viewport(&viewport_parameters(scale)?);

            let render_parameters = js_sys::Object::new();
            set_property(&render_parameters, "canvasContext", &context)?;
            set_property(&render_parameters, "viewport", &viewport)?;
            let task = self.page.render(&render_parameters);
            JsFuture::from(task.promise())
                .await
                .map_err(|err| ShimError::Js(describe_js(&err)))?;

            let blob = canvas_to_blob(&canvas, &params.mime_type).await?;
            blob_bytes(&blob).await
        }

        pub fn close(self) {
            self.page.cleanup();
        }
    }

    fn set_property(
        target: &js_sys::Object,
        key: &str,
        value: &JsValue,
    ) -> Result<(), ShimError> {
        js_sys::Reflect::set(target, &JsValue::from_str(key), value)
            .map(|_| ())
            .map_err(|err| ShimError::Js(describe_js(&err)))
    }

    fn viewport_parameters(scale: f64) -> Result<JsValue, ShimError> {
        let parameters = js_sys::Object::new();
        set_property(&parameters, "scale", &JsValue::from_f64(scale))?;
        Ok(parameters.into())
    }

    fn create_canvas(width: u32, height: u32) -> Result<web_sys::HtmlCanvasElement, ShimError> {
        let document = web_sys::window()
            .and_then(|window| window.document())
            .ok_or(ShimError::CanvasContext)?;
        let canvas = document
            .create_element("canvas")
            .map_err(|err| ShimError::Js(describe_js(&err)))?
            .dyn_into::<web_sys::HtmlCanvasElement>()
            .map_err(|_| ShimError::CanvasContext)?;
        canvas.set_width(width);
        canvas.set_height(height);
        Ok(canvas)
    }

    async fn canvas_to_blob(
        canvas: &web_sys::HtmlCanvasElement,
        mime_type: &str,
    ) -> Result<web_sys::Blob, ShimError> {
        let promise = js_sys::Promise::new(&mut |resolve, _reject| {
            let callback = Closure::once_into_js(move |blob: JsValue| {
                let _ = resolve.call1(&JsValue::UNDEFINED, &blob);
            });
            let _ = canvas.to_blob_with_type(callback.unchecked_ref(), mime_type);
        });
        let value = JsFuture::from(promise)
            .await
            .map_err(|_| ShimError::CreateBlob)?;
        value
            .dyn_into::<web_sys::Blob>()
            .map_err(|_| ShimError::CreateBlob)
    }

    async fn blob_bytes(blob: &web_sys::Blob) -> Result<Vec<u8>, ShimError> {
        let buffer = JsFuture::from(blob.array_buffer())
            .await
            .map_err(|_| ShimError::ReadBlob)?;
        Ok(js_sys::Uint8Array::new(&buffer).to_vec())
    }

    fn describe_js(value: &JsValue) -> String {
        value
            .as_string()
            .unwrap_or_else(|| format!("{:?}", value))
    }
}

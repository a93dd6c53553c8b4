//! Pipeline stages for TOC extraction and outline writing.
//!
//! Each submodule implements exactly one transformation step, so each can be
//! tested on its own and the two ends (rendering, writing) can be swapped
//! through their traits.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ llm ──▶ parse ┄┄(human edit)┄┄▶ mapper ──▶ outline
//! (path)    (pdfium)   (JPEG)    (VLM)   (toc)                    (offset)    (lopdf)
//! ```
//!
//! 1. [`input`]   — validate the user-supplied path is a readable PDF
//! 2. [`render`]  — rasterise the TOC pages; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 3. [`encode`]  — bound, JPEG-encode and base64-wrap each page
//! 4. [`llm`]     — one multimodal request carrying every page; the only
//!    stage with network I/O
//! 5. [`parse`]   — recover the `toc` list from any reply shape, or diagnose
//!    why it could not be recovered
//! 6. [`mapper`]  — coerce rows and shift printed pages to PDF pages
//! 7. [`outline`] — write the bookmark tree

pub mod encode;
pub mod input;
pub mod llm;
pub mod mapper;
pub mod outline;
pub mod parse;
pub mod render;

//! Pipeline stages for contract extraction.
//!
//! Each submodule implements exactly one transformation step, so each can be
//! tested alone and swapped (a different rasterizer, recognition backend or
//! model provider) without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ recognize ──▶ flatten ──▶ extract ──▶ enrich
//! (path/bytes) (pdfium) (OCR + layout) (text)     (LLM)      (VIN)
//! ```
//!
//! 1. [`input`]     — accept a path or byte buffer and check it is a PDF
//! 2. [`render`]    — rasterise every page; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 3. [`recognize`] — run the recognition engine per page ([`encode`] builds
//!    the request image) and normalise its output via [`layout`]
//! 4. [`flatten`]   — join every span into one prompt-ready string
//! 5. [`extract`]   — call the language model ([`llm`]) and parse its JSON
//! 6. [`enrich`]    — decode the VIN and merge vehicle attributes

pub mod encode;
pub mod enrich;
pub mod extract;
pub mod flatten;
pub mod input;
pub mod layout;
pub mod llm;
pub mod recognize;
pub mod render;

//! Pipeline stages for layout-aware PDF-to-Markdown conversion.
//!
//! Each submodule implements exactly one step and is testable on its own;
//! only [`pdfium`] and [`input`] touch the outside world.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ pdfium ──▶ extract ──▶ ocr (+cache) ──▶ classify ──▶ layout ──▶ markdown
//! (bytes)   (pages)    (PNGs)      (captions)       (items)      (lines)    (text)
//! ```
//!
//! 1. [`input`]    — resolve a path or URL to validated PDF bytes
//! 2. [`source`]   — the [`source::PageSource`] contract; [`pdfium`] implements
//!    it and runs under `spawn_blocking` because pdfium is not async-safe
//! 3. [`extract`]  — persist each embedded image as PNG through a [`sink::ByteSink`]
//!    into the request's [`sink::ScratchDir`]
//! 4. [`ocr`]      — recognize the images with bounded concurrency, backed by
//!    the content-addressed [`cache`]
//! 5. [`classify`] — font-size statistics → headings, bullets, italics, captions
//! 6. [`layout`]   — reading order and line grouping
//! 7. [`markdown`] — final text, one page at a time, joined by rules

pub mod cache;
pub mod classify;
pub mod extract;
pub mod input;
pub mod layout;
pub mod markdown;
pub mod ocr;
pub mod pdfium;
pub mod sink;
pub mod source;

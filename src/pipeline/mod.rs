//! Pipeline stages for ink-to-PNG conversion.
//!
//! Each submodule implements one transformation step and is tested on its own.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ decode ──▶ render ──▶ encode
//! (notebook)  (.rm v6)   (pens+raster)  (PNG)
//!               │
//!               └──────▶ recognize (optional, stroke request)
//! ```
//!
//! 1. [`input`]: resolve a `.rm` file, a `.content` manifest or a notebook
//!    directory and load its pages
//! 2. [`decode`]: parse v6 page blobs into the stroke model, resynchronising
//!    past corrupt records
//! 3. [`pens`]: per-point width, colour and opacity for each pen kind
//! 4. [`render`]: fit the page into the target width and draw it; runs in
//!    `spawn_blocking` because it is pure CPU work
//! 5. [`raster`]: disc, polygon and capsule primitives with alpha blending
//! 6. [`encode`]: PNG-encode the rendered page
//! 7. [`recognize`]: build the handwriting-recognition request and drive a
//!    recognition backend
//! 8. [`myscript`]: the MyScript cloud backend; the only stage with network I/O

pub mod decode;
pub mod encode;
pub mod input;
pub mod myscript;
pub mod pens;
pub mod raster;
pub mod recognize;
pub mod render;

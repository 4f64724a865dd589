// Pagesmith shared library
// Core logic for the AI site builder: session and version storage,
// the streamed generation pipeline, the preview editing protocol,
// and publishing.

pub mod models;
pub mod repositories;
pub mod services;
pub mod utils;

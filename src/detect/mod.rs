// Response stream inspection — per-line record classification.

pub mod frame;

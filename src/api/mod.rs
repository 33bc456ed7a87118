// Public entry points — the relay engine facade.

pub mod relay_api;

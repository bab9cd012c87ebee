pub mod enrich_current_span;
pub mod strip_trailing_slash;

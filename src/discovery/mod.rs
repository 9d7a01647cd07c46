//! URL discovery beyond in-page link extraction (SPEC_FULL.md §E).

pub mod sitemap;

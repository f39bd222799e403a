//! Cache-first location resolution plus bookmark and catalogue access.

use std::sync::Arc;

use tracing::{debug, info};

use crate::{
    catalog::{Catalog, Region},
    error::{Result, WeatherError},
    model::{Bookmark, NewBookmark, ResolvedLocation, normalize_query},
    resolver::LocationSource,
    store::Store,
};

#[derive(Clone)]
pub struct LocationRepository {
    store: Arc<Store>,
    source: Arc<dyn LocationSource>,
    catalog: Catalog,
}

impl std::fmt::Debug for LocationRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocationRepository")
            .field("store", &self.store)
            .field("regions", &self.catalog.regions().len())
            .finish_non_exhaustive()
    }
}

impl LocationRepository {
    pub fn new(store: Arc<Store>, source: Arc<dyn LocationSource>, catalog: Catalog) -> Self {
        Self { store, source, catalog }
    }

    /// Returns the cached location for `query`, resolving and caching it on a miss.
    ///
    /// A cache hit never reaches the remote source and never writes. Remote
    /// failures are returned unchanged and leave the cache untouched.
    pub async fn resolve_or_fetch(&self, query: &str) -> Result<ResolvedLocation> {
        let key = normalize_query(query);

        if let Some(cached) = self.store.location(&key)? {
            debug!(%key, "location cache hit");
            return Ok(cached);
        }

        debug!(%key, "location cache miss");
        let location = self.source.resolve(query).await?;
        self.store.upsert_location(&location)?;
        info!(%key, place = %location.place, "cached resolved location");
        Ok(location)
    }

    pub fn bookmarks(&self) -> Result<Vec<Bookmark>> {
        self.store.bookmarks()
    }

    pub fn bookmark(&self, id: i64) -> Result<Option<Bookmark>> {
        self.store.bookmark(id)
    }

    pub fn is_bookmark_duplicate(&self, region_name: &str, locality_name: &str) -> Result<bool> {
        Ok(self.store.find_bookmark(region_name, locality_name)?.is_some())
    }

    pub fn add_bookmark(&self, bookmark: NewBookmark) -> Result<Bookmark> {
        self.store.insert_bookmark(&bookmark)?.ok_or(WeatherError::DuplicateBookmark {
            region: bookmark.region_name,
            locality: bookmark.locality_name,
        })
    }

    pub fn remove_bookmark(&self, id: i64) -> Result<bool> {
        self.store.delete_bookmark(id)
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn regions(&self) -> &[Region] {
        self.catalog.regions()
    }

    pub fn region_by_name(&self, name: &str) -> Option<&Region> {
        self.catalog.region_by_name(name)
    }

    pub fn major_localities(&self, abbreviation: &str) -> &[String] {
        self.catalog.major_localities(abbreviation)
    }

    pub fn all_localities(&self, abbreviation: &str) -> &[String] {
        self.catalog.all_localities(abbreviation)
    }
}

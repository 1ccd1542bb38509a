use std::sync::Arc;

use avatar_native::AssetId;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::warn;

use crate::assets::{ImageLoader, LoadableAsset, PrimitiveLoader};

#[derive(Clone)]
pub enum AssetEntry {
    Primitive(Arc<PrimitiveLoader>),
    Image(Arc<ImageLoader>),
}

impl AssetEntry {
    pub fn asset(&self) -> &dyn LoadableAsset {
        match self {
            AssetEntry::Primitive(primitive) => primitive.as_ref(),
            AssetEntry::Image(image) => image.as_ref(),
        }
    }
}

/// Every asset that is alive in the session, by id. Assets register on construction and
/// unregister when disposed, so whatever is left at shutdown has leaked.
#[derive(Default)]
pub struct AssetRegistry {
    assets: DashMap<AssetId, AssetEntry>,
}

impl AssetRegistry {
    /// Returns false, and keeps the existing asset, if the id is already taken.
    pub fn register(&self, entry: AssetEntry) -> bool {
        let id = entry.asset().asset_id();
        match self.assets.entry(id) {
            Entry::Occupied(_) => {
                warn!("Asset {} is already registered", id);
                false
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                true
            }
        }
    }

    pub fn unregister(&self, id: AssetId) -> Option<AssetEntry> {
        self.assets.remove(&id).map(|(_, entry)| entry)
    }

    pub fn contains(&self, id: AssetId) -> bool {
        self.assets.contains_key(&id)
    }

    pub fn get(&self, id: AssetId) -> Option<AssetEntry> {
        self.assets.get(&id).map(|entry| entry.value().clone())
    }

    pub fn primitive(&self, id: AssetId) -> Option<Arc<PrimitiveLoader>> {
        match self.get(id)? {
            AssetEntry::Primitive(primitive) => Some(primitive),
            AssetEntry::Image(_) => None,
        }
    }

    pub fn image(&self, id: AssetId) -> Option<Arc<ImageLoader>> {
        match self.get(id)? {
            AssetEntry::Image(image) => Some(image),
            AssetEntry::Primitive(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Name and id of every registered asset.
    pub fn live_assets(&self) -> Vec<(AssetId, String)> {
        self.assets
            .iter()
            .map(|entry| (*entry.key(), entry.value().asset().name().to_string()))
            .collect()
    }
}

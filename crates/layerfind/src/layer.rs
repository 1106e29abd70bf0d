//! Layer resolution.
//!
//! Turns the ordered diff ids published in an image configuration into
//! [`Layer`] records that know their chain id and where the layer store keeps
//! their extracted content.

use log::debug;
use serde::Serialize;

use crate::digest::{chain_id, strip_algorithm};
use crate::error::{Error, Result};
use crate::store::LayerStore;

/// One entry in an image's layer stack.
///
/// Layers are fully resolved on construction and never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Layer {
    pub(crate) order: usize,
    pub(crate) diff_id: String,
    pub(crate) chain_id: String,
    pub(crate) cache_id: String,
}

impl Layer {
    /// Zero-based position in the stack; the base layer is 0.
    pub fn order(&self) -> usize {
        self.order
    }

    /// Digest of this layer's uncompressed content, `sha256:<hex>`.
    pub fn diff_id(&self) -> &str {
        &self.diff_id
    }

    /// Digest covering this layer and all of its ancestors, `sha256:<hex>`.
    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    /// Storage key under which the layer store keeps the extracted content.
    pub fn cache_id(&self) -> &str {
        &self.cache_id
    }
}

/// Computes the chain ids for an ordered (base first) list of diff ids.
///
/// Each chain id depends on the previous one, so this is strictly sequential.
///
/// # Errors
///
/// Returns [`Error::NoLayers`] for an empty list and [`Error::InvalidDigest`]
/// if any diff id is not a `sha256:` digest.
pub fn chain_ids(diff_ids: &[String]) -> Result<Vec<String>> {
    let Some((base, rest)) = diff_ids.split_first() else {
        return Err(Error::NoLayers);
    };

    for diff_id in diff_ids {
        strip_algorithm(diff_id)?;
    }

    let mut chain = Vec::with_capacity(diff_ids.len());
    chain.push(base.clone());
    for diff_id in rest {
        let parent = &chain[chain.len() - 1];
        chain.push(chain_id(parent, diff_id));
    }
    Ok(chain)
}

/// Resolves an ordered list of diff ids into fully populated layers.
///
/// Every layer looks up its own storage key from its own chain id.
///
/// # Errors
///
/// In addition to the errors of [`chain_ids`], fails with
/// [`Error::LayerNotFound`] as soon as one chain id has no local content.
pub fn resolve_layers(diff_ids: &[String], store: &dyn LayerStore) -> Result<Vec<Layer>> {
    let chain = chain_ids(diff_ids)?;

    diff_ids
        .iter()
        .zip(chain)
        .enumerate()
        .map(|(order, (diff_id, chain_id))| {
            let cache_id = store.cache_id(strip_algorithm(&chain_id)?)?;
            debug!("layer {order}: diff {diff_id} chain {chain_id} cache {cache_id}");
            Ok(Layer {
                order,
                diff_id: diff_id.clone(),
                chain_id,
                cache_id,
            })
        })
        .collect()
}

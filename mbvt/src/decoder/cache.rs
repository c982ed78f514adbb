//! Single-slot memo of the last decoded payload, for repeated feature lookups.

use std::sync::Arc;

use bytes::Bytes;

use super::feature_decoder::FeatureDecoder;

/// Payloads are told apart by identity, not by content. The slot keeps its payload alive, so the
/// memory cannot be reused for a different one while it is cached.
#[derive(Debug, Default)]
pub struct FeatureDecodeCache {
    entry: Option<(Bytes, Arc<FeatureDecoder>)>,
}

fn same_payload(a: &Bytes, b: &Bytes) -> bool {
    a.as_ptr() == b.as_ptr() && a.len() == b.len()
}

impl FeatureDecodeCache {
    pub fn get(&self, payload: &Bytes) -> Option<Arc<FeatureDecoder>> {
        match &self.entry {
            Some((cached, decoder)) if same_payload(cached, payload) => Some(decoder.clone()),
            _ => None,
        }
    }

    /// Store `decoder` for `payload` and return the decoder to use. When a decoder for the same
    /// payload got installed meanwhile, that one stays and is returned instead.
    pub fn install(&mut self, payload: &Bytes, decoder: Arc<FeatureDecoder>) -> Arc<FeatureDecoder> {
        if let Some(existing) = self.get(payload) {
            return existing;
        }
        self.entry = Some((payload.clone(), decoder.clone()));
        decoder
    }

    pub fn clear(&mut self) {
        self.entry = None;
    }
}

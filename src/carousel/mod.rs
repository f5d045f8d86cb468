//! Data carousel reassembly: DII bookkeeping, DDB block collection and
//! module completion (inflate + multipart split).

use std::collections::HashMap;
use std::io::Read;

use bytes::{Bytes, BytesMut};
use flate2::read::ZlibDecoder;
use tracing::{debug, info, warn};

use crate::dsmcc::{Compression, DdbMessage, DiiMessage};
use crate::entity::{parse_media_type, parse_media_type_str, EntityParser};
use crate::error::ModuleError;
use crate::types::{ModuleDownloaded, ModuleFile, ModuleListEntry, ModuleListUpdated};

/// Reception progress of one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Pending,
    Downloading,
    Complete,
}

/// Module as announced by the latest DII.
#[derive(Debug, Clone)]
pub struct ModuleMeta {
    pub module_id:     u16,
    pub version:       u8,
    pub size:          u32,
    pub compression:   Compression,
    pub content_type:  Option<String>,
    pub data_event_id: u8,
    blocks:            Vec<Option<Bytes>>,
    downloaded:        usize,
    complete:          bool,
}

impl ModuleMeta {
    pub fn state(&self) -> ModuleState {
        match (self.complete, self.downloaded) {
            (true, _) => ModuleState::Complete,
            (false, 0) => ModuleState::Pending,
            _ => ModuleState::Downloading,
        }
    }

    pub fn block_count(&self) -> usize { self.blocks.len() }

    pub fn downloaded_block_count(&self) -> usize { self.downloaded }

    fn same_edition(&self, other: &ModuleMeta) -> bool {
        self.version == other.version
            && self.data_event_id == other.data_event_id
            && self.size == other.size
            && self.blocks.len() == other.blocks.len()
    }
}

/// Component as announced by the latest DII.
#[derive(Debug, Clone)]
pub struct Component {
    pub component_id:   u8,
    pub transaction_id: u32,
    pub data_event_id:  u8,
    pub modules:        HashMap<u16, ModuleMeta>,
}

/// `(version, data_event_id)` of the last module handed out, per key.
type Delivered = HashMap<u8, HashMap<u16, (u8, u8)>>;

#[derive(Debug, Default)]
pub struct CarouselReassembler {
    components: HashMap<u8, Component>,
    delivered:  Delivered,
}

impl CarouselReassembler {
    pub fn new() -> Self { Self::default() }

    pub fn component(&self, component_id: u8) -> Option<&Component> {
        self.components.get(&component_id)
    }

    /// Forgets everything, e.g. after a PAT change.
    pub fn reset(&mut self) {
        self.components.clear();
        self.delivered.clear();
    }

    /// Applies a DII. Returns `None` when its transaction_id was already
    /// applied for this component.
    pub fn on_dii(&mut self, component_id: u8, dii: &DiiMessage) -> Option<ModuleListUpdated> {
        if self.components.get(&component_id).is_some_and(|c| c.transaction_id == dii.transaction_id) {
            return None;
        }
        let previous = self.components.remove(&component_id);

        if previous.as_ref().map(|p| p.data_event_id) != Some(dii.data_event_id) {
            if let Some(delivered) = self.delivered.get_mut(&component_id) {
                if !delivered.is_empty() {
                    info!(component_id, data_event_id = dii.data_event_id, "data event changed, cached modules evicted");
                }
                delivered.clear();
            }
        }

        let mut modules = HashMap::with_capacity(dii.modules.len());
        for m in &dii.modules {
            let mut meta = ModuleMeta {
                module_id:     m.module_id,
                version:       m.version,
                size:          m.module_size,
                compression:   m.compression,
                content_type:  m.content_type.clone(),
                data_event_id: dii.data_event_id,
                blocks:        vec![None; m.block_count(dii.block_size)],
                downloaded:    0,
                complete:      false,
            };
            // keep blocks collected under the previous DII for an unchanged module
            if let Some(old) = previous.as_ref().and_then(|p| p.modules.get(&m.module_id)) {
                if old.same_edition(&meta) {
                    meta.blocks     = old.blocks.clone();
                    meta.downloaded = old.downloaded;
                    meta.complete   = old.complete;
                }
            }
            modules.insert(m.module_id, meta);
        }

        debug!(component_id, transaction_id = dii.transaction_id, modules = modules.len(), "DII applied");
        self.components.insert(component_id, Component {
            component_id,
            transaction_id: dii.transaction_id,
            data_event_id:  dii.data_event_id,
            modules,
        });

        Some(ModuleListUpdated {
            component_id,
            modules: dii.modules
                .iter()
                .map(|m| ModuleListEntry { id: m.module_id, version: m.version, size: m.module_size })
                .collect(),
            data_event_id: dii.data_event_id,
            return_to_entry_flag: dii.return_to_entry_flag,
        })
    }

    /// Applies a DDB block. Returns the finished module when this block
    /// completed a module edition not delivered before.
    pub fn on_ddb(&mut self, component_id: u8, ddb: &DdbMessage<'_>) -> Option<ModuleDownloaded> {
        let component = self.components.get_mut(&component_id)?;
        let Some(meta) = component.modules.get_mut(&ddb.module_id) else {
            debug!(component_id, module_id = ddb.module_id, "DDB for module not in DII");
            return None;
        };
        if meta.version != ddb.version || meta.data_event_id != ddb.data_event_id {
            debug!(component_id, module_id = ddb.module_id, version = ddb.version, "stale DDB dropped");
            return None;
        }
        if meta.complete {
            return None;
        }
        let slot = meta.blocks.get_mut(ddb.block_number as usize)?;
        if slot.is_some() {
            return None;
        }
        *slot = Some(Bytes::copy_from_slice(ddb.data));
        meta.downloaded += 1;
        if meta.downloaded < meta.blocks.len() {
            return None;
        }

        meta.complete = true;
        let mut payload = BytesMut::with_capacity(meta.size as usize);
        for block in meta.blocks.iter_mut() {
            if let Some(b) = block.take() { payload.extend_from_slice(&b) }
        }

        let delivered = self.delivered.entry(component_id).or_default();
        let edition   = (meta.version, meta.data_event_id);
        if delivered.get(&meta.module_id) == Some(&edition) {
            return None;
        }

        match complete_module(meta, payload.freeze()) {
            Ok(files) => {
                delivered.insert(meta.module_id, edition);
                info!(component_id, module_id = meta.module_id, version = meta.version, files = files.len(), "module downloaded");
                Some(ModuleDownloaded {
                    component_id,
                    module_id:     meta.module_id,
                    files,
                    version:       meta.version,
                    data_event_id: meta.data_event_id,
                })
            }
            Err(e) => {
                warn!(component_id, module_id = meta.module_id, "module dropped: {e}");
                None
            }
        }
    }
}

fn inflate(data: &[u8], original_size: u32) -> Result<Bytes, ModuleError> {
    let mut out = Vec::with_capacity(original_size as usize);
    ZlibDecoder::new(data).read_to_end(&mut out)?;
    if out.len() != original_size as usize {
        return Err(ModuleError::SizeMismatch { expected: original_size, actual: out.len() });
    }
    Ok(Bytes::from(out))
}

/// Missing or `multipart/mixed` content type: the module is an entity
/// whose parts become named files. Anything else is one unnamed file.
fn complete_module(meta: &ModuleMeta, payload: Bytes) -> Result<Vec<ModuleFile>, ModuleError> {
    let data = match meta.compression {
        Compression::Zlib { original_size } => inflate(&payload, original_size)?,
        Compression::None => payload,
    };

    let media_type = meta.content_type.as_deref().and_then(parse_media_type_str);
    if let Some(media_type) = media_type.filter(|m| !m.is_multipart_mixed()) {
        return Ok(vec![ModuleFile { content_location: None, content_type: media_type, data }]);
    }

    let entity = EntityParser::new(&data).read_entity().ok_or(ModuleError::Multipart)?;
    let parts  = entity.multipart_body.ok_or(ModuleError::Multipart)?;

    let mut files: Vec<ModuleFile> = Vec::with_capacity(parts.len());
    for part in parts {
        let Some(location) = part.header("content-location") else {
            warn!(module_id = meta.module_id, "part without Content-Location");
            continue;
        };
        let Some(content_type) = part.header("content-type").and_then(|h| parse_media_type(&h.value)) else {
            warn!(module_id = meta.module_id, "part without valid Content-Type");
            continue;
        };
        let location = location.text();
        let body     = data.slice_ref(part.body);
        files.retain(|f| f.content_location.as_deref() != Some(location.as_str()));
        files.push(ModuleFile { content_location: Some(location), content_type, data: body });
    }
    Ok(files)
}

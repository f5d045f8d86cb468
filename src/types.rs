//! Protocol messages carried from the demuxer to the resource cache.
//!
//! Serialized as JSON objects with a `type` discriminator and camelCase
//! fields; module file payloads travel as base64.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Message {
    Pmt(PmtMessage),
    ModuleListUpdated(ModuleListUpdated),
    ModuleDownloaded(ModuleDownloaded),
    EsEventUpdated(EsEventUpdated),
    ProgramInfo(ProgramInfo),
    Pcr(Pcr),
    CurrentTime(CurrentTime),
    Bit(BitMessage),
    Error(ErrorMessage),
}

/* ── PMT ─────────────────────────────────────────────────────────────── */

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PmtMessage {
    pub components: Vec<ComponentPmt>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentPmt {
    pub pid:          u16,
    pub component_id: u8,
    pub stream_type:  u8,
    /// STD-B10 data_component_id, when a data component descriptor exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_component_id: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bxml_info: Option<BxmlInfo>,
}

/// additional_arib_bxml_info of the data component descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BxmlInfo {
    pub transmission_format: u8,
    pub entry_point_flag:    bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point_info: Option<BxmlEntryPointInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_arib_carousel_info: Option<AribCarouselInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BxmlEntryPointInfo {
    pub auto_start_flag:      bool,
    pub document_resolution:  u8,
    #[serde(rename = "useXML")]
    pub use_xml:              bool,
    pub default_version_flag: bool,
    pub independent_flag:     bool,
    #[serde(rename = "styleForTVFlag")]
    pub style_for_tv_flag:    bool,
    pub bml_major_version:    u16,
    pub bml_minor_version:    u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bxml_major_version:   Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bxml_minor_version:   Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AribCarouselInfo {
    pub data_event_id:           u8,
    pub event_section_flag:      bool,
    pub ondemand_retrieval_flag: bool,
    pub file_storable_flag:      bool,
    pub start_priority:          u8,
}

/* ── carousel ────────────────────────────────────────────────────────── */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleListEntry {
    pub id:      u16,
    pub version: u8,
    pub size:    u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleListUpdated {
    pub component_id:  u8,
    pub modules:       Vec<ModuleListEntry>,
    pub data_event_id: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_to_entry_flag: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDownloaded {
    pub component_id:  u8,
    pub module_id:     u16,
    pub files:         Vec<ModuleFile>,
    pub version:       u8,
    pub data_event_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleFile {
    /// `None` for the single unnamed file of a non-multipart module
    pub content_location: Option<String>,
    pub content_type:     MediaType,
    #[serde(rename = "dataBase64", with = "base64_bytes")]
    pub data:             Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaType {
    pub r#type:           String,
    pub original_type:    String,
    pub subtype:          String,
    pub original_subtype: String,
    pub parameters:       Vec<MediaTypeParameter>,
}

impl MediaType {
    pub fn parameter(&self, attribute: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|p| p.attribute == attribute)
            .map(|p| p.value.as_str())
    }

    pub fn is_multipart_mixed(&self) -> bool {
        self.r#type == "multipart" && self.subtype == "mixed"
    }

    /// `type/subtype` in lower case
    pub fn essence(&self) -> String {
        format!("{}/{}", self.r#type, self.subtype)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaTypeParameter {
    pub attribute:          String,
    pub original_attribute: String,
    pub value:              String,
}

/* ── stream events ───────────────────────────────────────────────────── */

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EsEventUpdated {
    pub component_id:  u8,
    pub events:        Vec<EsEvent>,
    pub data_event_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EsEvent {
    #[serde(rename_all = "camelCase")]
    ImmediateEvent {
        event_message_group_id: u16,
        time_mode:              u8,
        event_message_type:     u8,
        event_message_id:       u16,
        private_data_byte:      Vec<u8>,
    },
    #[serde(rename_all = "camelCase")]
    NptEvent {
        event_message_group_id: u16,
        time_mode:              u8,
        /// 33-bit
        #[serde(rename = "eventMessageNPT")]
        event_message_npt:      u64,
        event_message_type:     u8,
        event_message_id:       u16,
        private_data_byte:      Vec<u8>,
    },
    #[serde(rename_all = "camelCase")]
    NptReference {
        post_discontinuity_indicator: bool,
        dsm_content_id:               u8,
        #[serde(rename = "STCReference")]
        stc_reference:                u64,
        #[serde(rename = "NPTReference")]
        npt_reference:                u64,
        scale_numerator:              u16,
        scale_denominator:            u16,
    },
}

/* ── SI ──────────────────────────────────────────────────────────────── */

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramInfo {
    pub original_network_id:    Option<u16>,
    pub transport_stream_id:    Option<u16>,
    pub service_id:             Option<u16>,
    pub event_id:               Option<u16>,
    pub event_name:             Option<String>,
    pub start_time_unix_millis: Option<i64>,
    pub duration_seconds:       Option<u32>,
    pub network_id:             Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pcr {
    /// 33-bit, 90 kHz
    pub pcr_base:      u64,
    pub pcr_extension: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentTime {
    pub time_unix_millis: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitMessage {
    pub original_network_id: u16,
    pub broadcasters:        Vec<BitBroadcaster>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitBroadcaster {
    pub broadcaster_id:           u8,
    pub broadcaster_name:         Option<String>,
    pub services:                 Vec<BitService>,
    pub affiliations:             Vec<u8>,
    pub affiliation_broadcasters: Vec<BitExtendedBroadcaster>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terrestrial_broadcaster_id: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitService {
    pub service_type: u8,
    pub service_id:   u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitExtendedBroadcaster {
    pub original_network_id: u16,
    pub broadcaster_id:      u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
}

mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &Bytes, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Bytes, D::Error> {
        let text = String::deserialize(d)?;
        STANDARD
            .decode(text)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_downloaded_wire_shape() {
        let msg = Message::ModuleDownloaded(ModuleDownloaded {
            component_id:  0x40,
            module_id:     0,
            files: vec![ModuleFile {
                content_location: None,
                content_type: crate::entity::parse_media_type_str("text/plain").unwrap(),
                data: Bytes::from_static(b"hi"),
            }],
            version:       1,
            data_event_id: 2,
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "moduleDownloaded");
        assert_eq!(json["componentId"], 0x40);
        assert_eq!(json["files"][0]["dataBase64"], "aGk=");
        assert_eq!(json["files"][0]["contentType"]["type"], "text");
        assert!(json["files"][0]["contentLocation"].is_null());

        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn es_event_field_names() {
        let ev = EsEvent::NptReference {
            post_discontinuity_indicator: false,
            dsm_content_id:    1,
            stc_reference:     2,
            npt_reference:     3,
            scale_numerator:   1,
            scale_denominator: 1,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "nptReference");
        assert_eq!(json["STCReference"], 2);
        assert_eq!(json["NPTReference"], 3);
        assert_eq!(json["dsmContentId"], 1);
    }
}

//! Remote list roles, documents and update shapes

use serde::{Deserialize, Serialize};
use std::fmt;

use super::batch::UpdateKind;

/// List-type path segment for IP lists
pub const IP_LIST_TYPE: &str = "elements/ip_list";
/// List-type path segment for URL/domain lists
pub const URL_LIST_TYPE: &str = "elements/url_list_application";
/// Sub-resource holding the entries of an IP list
pub const IP_ADDRESS_LIST_SEGMENT: &str = "ip_address_list";

/// Position every URL entry is inserted at
///
/// The appliance numbers `url_entry` from 1, so new entries always land at
/// the head of the list and sequential adds end up newest-first.
pub const URL_ENTRY_INSERT_INDEX: usize = 1;

/// Remote list family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListKind {
    Ip,
    Url,
}

impl ListKind {
    /// List-type path segment used for creation and lookup
    pub fn list_type(&self) -> &'static str {
        match self {
            ListKind::Ip => IP_LIST_TYPE,
            ListKind::Url => URL_LIST_TYPE,
        }
    }

    /// Path of the document retrieved and updated for list `id`
    pub fn document_path(&self, id: &str) -> String {
        match self {
            ListKind::Ip => format!("{}/{}/{}", IP_LIST_TYPE, id, IP_ADDRESS_LIST_SEGMENT),
            ListKind::Url => format!("{}/{}", URL_LIST_TYPE, id),
        }
    }

    /// The role of this kind for the given safelist flag
    pub fn role(self, safelist: bool) -> ListRole {
        let polarity = if safelist {
            ListPolarity::Safelist
        } else {
            ListPolarity::Blocklist
        };
        ListRole::new(self, polarity)
    }
}

/// Safelist or blocklist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListPolarity {
    Safelist,
    Blocklist,
}

/// The remote list a reconciliation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListRole {
    pub kind: ListKind,
    pub polarity: ListPolarity,
}

impl ListRole {
    pub const IP_SAFELIST: ListRole = ListRole::new(ListKind::Ip, ListPolarity::Safelist);
    pub const IP_BLOCKLIST: ListRole = ListRole::new(ListKind::Ip, ListPolarity::Blocklist);
    pub const URL_SAFELIST: ListRole = ListRole::new(ListKind::Url, ListPolarity::Safelist);
    pub const URL_BLOCKLIST: ListRole = ListRole::new(ListKind::Url, ListPolarity::Blocklist);

    pub const fn new(kind: ListKind, polarity: ListPolarity) -> Self {
        Self { kind, polarity }
    }

    /// Stable local name, used both as the remote list name and as the
    /// registry key
    pub fn local_name(&self) -> &'static str {
        match (self.kind, self.polarity) {
            (ListKind::Ip, ListPolarity::Safelist) => "dim_safelist",
            (ListKind::Ip, ListPolarity::Blocklist) => "dim_blocklist",
            (ListKind::Url, ListPolarity::Safelist) => "dim_url_safelist",
            (ListKind::Url, ListPolarity::Blocklist) => "dim_url_blocklist",
        }
    }

    /// Comment attached to the list when it is created
    pub fn comment(&self) -> &'static str {
        match (self.kind, self.polarity) {
            (ListKind::Ip, ListPolarity::Safelist) => {
                "IP Safelist imported from the Dynamic Intelligence Manager."
            }
            (ListKind::Ip, ListPolarity::Blocklist) => {
                "IP Blocklist imported from the Dynamic Intelligence Manager."
            }
            (ListKind::Url, ListPolarity::Safelist) => {
                "URL/Domain Safelist imported from the Dynamic Intelligence Manager."
            }
            (ListKind::Url, ListPolarity::Blocklist) => {
                "URL/Domain Blocklist imported from the Dynamic Intelligence Manager."
            }
        }
    }

    pub fn list_type(&self) -> &'static str {
        self.kind.list_type()
    }
}

impl fmt::Display for ListRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.local_name())
    }
}

/// Input of a single reconciliation call
///
/// Built fresh for every classified sub-batch and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListParams {
    pub update: UpdateKind,
    pub kind: ListKind,
    pub safelist: bool,
    pub batch_id: i64,
    pub items: Vec<String>,
}

impl ListParams {
    pub fn new(
        update: UpdateKind,
        kind: ListKind,
        safelist: bool,
        batch_id: i64,
        items: Vec<String>,
    ) -> Self {
        Self {
            update,
            kind,
            safelist,
            batch_id,
            items,
        }
    }

    /// The role selected by the safelist flag
    pub fn role(&self) -> ListRole {
        self.kind.role(self.safelist)
    }

    pub fn list_type(&self) -> &'static str {
        self.kind.list_type()
    }
}

/// IP list or URL list document as exchanged with the appliance
///
/// Fields the exporter does not understand are carried through unchanged so
/// a full-document replace does not drop them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub url_entry: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ListDocument {
    /// Creation payload for `role`
    ///
    /// URL lists cannot be created empty, so they carry `initial_items`;
    /// IP lists are always created empty.
    pub fn for_creation(role: ListRole, initial_items: &[String]) -> Self {
        let url_entry = match role.kind {
            ListKind::Url => initial_items.to_vec(),
            ListKind::Ip => Vec::new(),
        };
        Self {
            name: Some(role.local_name().to_string()),
            comment: Some(role.comment().to_string()),
            url_entry,
            ..Self::default()
        }
    }

    /// 1-based positions of every URL entry equal to `value`
    pub fn url_entry_positions(&self, value: &str) -> Vec<usize> {
        self.url_entry
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.as_str() == value)
            .map(|(index, _)| index + 1)
            .collect()
    }
}

/// JSON-Patch operation verbs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Remove,
    Replace,
}

/// One JSON-Patch operation against a URL list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchOperation {
    pub op: PatchOp,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl PatchOperation {
    /// Insert `value` at the fixed head position
    pub fn insert_url(value: impl Into<String>) -> Self {
        Self {
            op: PatchOp::Add,
            path: url_entry_path(URL_ENTRY_INSERT_INDEX),
            value: Some(value.into()),
        }
    }

    /// Remove the entry at 1-based `position`
    pub fn remove_url(position: usize) -> Self {
        Self {
            op: PatchOp::Remove,
            path: url_entry_path(position),
            value: None,
        }
    }
}

/// JSON pointer of the URL entry at 1-based `position`
pub fn url_entry_path(position: usize) -> String {
    format!("/url_entry/{}", position)
}

/// Write submitted to the appliance after a retrieve
#[derive(Debug, Clone, PartialEq)]
pub enum ListUpdate {
    /// Full-document replace guarded by the retrieved ETag
    IpList { document: ListDocument, etag: String },
    /// Unconditional JSON-Patch
    UrlPatch { operations: Vec<PatchOperation> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_table() {
        assert_eq!(ListRole::IP_SAFELIST.local_name(), "dim_safelist");
        assert_eq!(ListRole::IP_BLOCKLIST.local_name(), "dim_blocklist");
        assert_eq!(ListRole::URL_SAFELIST.local_name(), "dim_url_safelist");
        assert_eq!(ListRole::URL_BLOCKLIST.local_name(), "dim_url_blocklist");
        assert_eq!(ListRole::URL_BLOCKLIST.list_type(), "elements/url_list_application");
        assert_eq!(ListKind::Ip.role(true), ListRole::IP_SAFELIST);
        assert_eq!(ListKind::Url.role(false), ListRole::URL_BLOCKLIST);
    }

    #[test]
    fn test_document_paths() {
        assert_eq!(ListKind::Ip.document_path("42"), "elements/ip_list/42/ip_address_list");
        assert_eq!(ListKind::Url.document_path("9"), "elements/url_list_application/9");
    }

    #[test]
    fn test_creation_payloads() {
        let items = vec!["bad.example.com".to_string()];

        let ip = serde_json::to_value(ListDocument::for_creation(ListRole::IP_BLOCKLIST, &items)).unwrap();
        assert_eq!(
            ip,
            serde_json::json!({
                "name": "dim_blocklist",
                "comment": "IP Blocklist imported from the Dynamic Intelligence Manager."
            })
        );

        let url = serde_json::to_value(ListDocument::for_creation(ListRole::URL_SAFELIST, &items)).unwrap();
        assert_eq!(url["url_entry"], serde_json::json!(["bad.example.com"]));
    }

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let doc: ListDocument =
            serde_json::from_str(r#"{"ip": ["10.0.0.1"], "key": 17, "link": []}"#).unwrap();
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["key"], 17);
        assert_eq!(value["ip"], serde_json::json!(["10.0.0.1"]));
    }

    #[test]
    fn test_patch_operation_shapes() {
        assert_eq!(
            serde_json::to_value(PatchOperation::insert_url("a.example")).unwrap(),
            serde_json::json!({"op": "add", "path": "/url_entry/1", "value": "a.example"})
        );
        assert_eq!(
            serde_json::to_value(PatchOperation::remove_url(5)).unwrap(),
            serde_json::json!({"op": "remove", "path": "/url_entry/5"})
        );
    }

    #[test]
    fn test_url_entry_positions_are_one_based() {
        let doc = ListDocument {
            url_entry: ["a", "old", "b", "c", "old", "d"].iter().map(|s| s.to_string()).collect(),
            ..ListDocument::default()
        };
        assert_eq!(doc.url_entry_positions("old"), vec![2, 5]);
        assert!(doc.url_entry_positions("missing").is_empty());
    }
}

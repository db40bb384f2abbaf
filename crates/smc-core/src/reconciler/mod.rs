//! List reconciliation
//!
//! Applies one [`ListParams`] to the remote list selected by its kind and
//! safelist flag:
//!
//! 1. Create the list on first use (add only)
//! 2. Retrieve the current document and its concurrency token
//! 3. Transform it into a [`ListUpdate`]
//! 4. Submit the update with the verb and headers its list type requires
//!
//! IP lists are replaced as a whole document guarded by the retrieved ETag.
//! URL lists are changed through JSON-Patch with an unconditional `If-Match`.

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::model::{
    ListDocument, ListKind, ListParams, ListRole, ListUpdate, PatchOperation, UpdateKind,
};
use crate::registry::ListRegistry;
use crate::traits::{ApiRequest, SmcApi, execute_with_reauth};

/// Media type requested for JSON-Patch submissions
pub const JSON_PATCH_MEDIA_TYPE: &str = "application/json-patch+json";

/// What a successful reconciliation did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// The list was created already holding the values
    Created,
    /// An update was submitted and accepted
    Updated,
    /// Nothing needed to change
    Unchanged,
}

/// Reconciles batches of values into remote lists
#[derive(Clone)]
pub struct ListReconciler {
    registry: ListRegistry,
}

impl ListReconciler {
    pub fn new(registry: ListRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ListRegistry {
        &self.registry
    }

    /// Apply `params` to its remote list through `api`
    ///
    /// # Errors
    ///
    /// - `NotSupported`: delete against an IP list (no request is sent)
    /// - `NotFound`: no list is registered for the role
    /// - `Remote`: unexpected HTTP status at any step
    /// - `Protocol`: malformed response (missing ETag or Location, bad JSON)
    pub async fn reconcile(&self, api: &dyn SmcApi, params: &ListParams) -> Result<ReconcileOutcome> {
        let role = params.role();

        if params.update == UpdateKind::Delete && params.kind == ListKind::Ip {
            return Err(Error::not_supported(format!(
                "removing entries from IP list {}",
                role
            )));
        }

        if params.items.is_empty() {
            debug!("Batch {}: nothing to reconcile into {}", params.batch_id, role);
            return Ok(ReconcileOutcome::Unchanged);
        }

        if params.update == UpdateKind::Add {
            let created = self.registry.ensure_list(api, role, &params.items).await?;
            if created && params.kind == ListKind::Url {
                info!(
                    "Batch {}: created {} with {} entries",
                    params.batch_id,
                    role,
                    params.items.len()
                );
                return Ok(ReconcileOutcome::Created);
            }
        }

        let id = self
            .registry
            .lookup(role)
            .await?
            .ok_or_else(|| Error::not_found(format!("no remote list registered for {}", role)))?;
        let path = params.kind.document_path(&id);

        let (document, etag) = self.retrieve(api, &path, role).await?;

        match build_update(params, document, etag)? {
            Some(update) => {
                self.submit(api, &path, role, update).await?;
                info!(
                    "Batch {}: {} {} value(s) in {}",
                    params.batch_id,
                    match params.update {
                        UpdateKind::Add => "added",
                        UpdateKind::Delete => "removed",
                    },
                    params.items.len(),
                    role
                );
                Ok(ReconcileOutcome::Updated)
            }
            None => {
                debug!("Batch {}: no matching entries in {}", params.batch_id, role);
                Ok(ReconcileOutcome::Unchanged)
            }
        }
    }

    /// Fetch the list document and its ETag
    async fn retrieve(
        &self,
        api: &dyn SmcApi,
        path: &str,
        role: ListRole,
    ) -> Result<(ListDocument, Option<String>)> {
        let request = ApiRequest::get(path).accept_json();
        let response = execute_with_reauth(api, &request, "list retrieval").await?;

        if response.status != 200 {
            return Err(Error::remote(
                response.status,
                format!("retrieving list {}", role),
            ));
        }

        let etag = response.header("etag").map(str::to_string);
        let document = response.json::<ListDocument>()?;
        Ok((document, etag))
    }

    async fn submit(
        &self,
        api: &dyn SmcApi,
        path: &str,
        role: ListRole,
        update: ListUpdate,
    ) -> Result<()> {
        let (request, expected, step) = match update {
            ListUpdate::IpList { document, etag } => (
                ApiRequest::post(path)
                    .json(serde_json::to_value(&document)?)
                    .header("If-Match", etag),
                202,
                "IP list update",
            ),
            ListUpdate::UrlPatch { operations } => (
                ApiRequest::patch(path)
                    .json(serde_json::to_value(&operations)?)
                    .header("Accept", JSON_PATCH_MEDIA_TYPE)
                    .header("If-Match", "*"),
                200,
                "URL list patch",
            ),
        };

        let response = execute_with_reauth(api, &request, step).await?;
        if response.status != expected {
            return Err(Error::remote(
                response.status,
                format!("{} of {}", step, role),
            ));
        }
        Ok(())
    }
}

/// Turn a retrieved document into the write that applies `params`
///
/// Returns `None` when there is nothing to submit.
pub fn build_update(
    params: &ListParams,
    mut document: ListDocument,
    etag: Option<String>,
) -> Result<Option<ListUpdate>> {
    match (params.kind, params.update) {
        (ListKind::Ip, UpdateKind::Add) => {
            let etag = etag.ok_or_else(|| {
                Error::protocol(format!("retrieve of {} returned no ETag", params.role()))
            })?;
            document.ip.extend(params.items.iter().cloned());
            Ok(Some(ListUpdate::IpList { document, etag }))
        }
        (ListKind::Ip, UpdateKind::Delete) => Err(Error::not_supported(format!(
            "removing entries from IP list {}",
            params.role()
        ))),
        (ListKind::Url, UpdateKind::Add) => {
            let operations = params
                .items
                .iter()
                .map(|value| PatchOperation::insert_url(value.as_str()))
                .collect();
            Ok(Some(ListUpdate::UrlPatch { operations }))
        }
        (ListKind::Url, UpdateKind::Delete) => {
            let mut positions: Vec<usize> = params
                .items
                .iter()
                .flat_map(|value| document.url_entry_positions(value))
                .collect();
            positions.sort_unstable();
            positions.dedup();

            if positions.is_empty() {
                return Ok(None);
            }
            let operations = positions.into_iter().map(PatchOperation::remove_url).collect();
            Ok(Some(ListUpdate::UrlPatch { operations }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PatchOp;

    fn params(kind: ListKind, update: UpdateKind, items: &[&str]) -> ListParams {
        ListParams::new(
            update,
            kind,
            false,
            1,
            items.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn test_ip_add_appends_and_keeps_etag() {
        let document = ListDocument {
            ip: vec!["10.0.0.1".to_string()],
            ..ListDocument::default()
        };
        let update = build_update(
            &params(ListKind::Ip, UpdateKind::Add, &["10.0.0.5"]),
            document,
            Some("\"v1\"".to_string()),
        )
        .unwrap();

        match update {
            Some(ListUpdate::IpList { document, etag }) => {
                assert_eq!(document.ip, vec!["10.0.0.1", "10.0.0.5"]);
                assert_eq!(etag, "\"v1\"");
            }
            other => panic!("unexpected update: {:?}", other),
        }
    }

    #[test]
    fn test_ip_add_without_etag_is_protocol_error() {
        let result = build_update(
            &params(ListKind::Ip, UpdateKind::Add, &["10.0.0.5"]),
            ListDocument::default(),
            None,
        );
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[test]
    fn test_url_add_inserts_each_value_at_head() {
        let update = build_update(
            &params(ListKind::Url, UpdateKind::Add, &["a", "b", "c"]),
            ListDocument::default(),
            None,
        )
        .unwrap();

        let Some(ListUpdate::UrlPatch { operations }) = update else {
            panic!("expected a patch");
        };
        assert_eq!(operations.len(), 3);
        assert!(operations.iter().all(|op| op.op == PatchOp::Add && op.path == "/url_entry/1"));
        assert_eq!(operations[2].value.as_deref(), Some("c"));
    }

    #[test]
    fn test_url_delete_targets_matching_positions() {
        let document = ListDocument {
            url_entry: ["a", "old", "b", "c", "old"].iter().map(|s| s.to_string()).collect(),
            ..ListDocument::default()
        };
        let update = build_update(
            &params(ListKind::Url, UpdateKind::Delete, &["old"]),
            document.clone(),
            None,
        )
        .unwrap();

        let Some(ListUpdate::UrlPatch { operations }) = update else {
            panic!("expected a patch");
        };
        let paths: Vec<&str> = operations.iter().map(|op| op.path.as_str()).collect();
        assert_eq!(paths, vec!["/url_entry/2", "/url_entry/5"]);
        assert!(operations.iter().all(|op| op.op == PatchOp::Remove && op.value.is_none()));

        let nothing = build_update(
            &params(ListKind::Url, UpdateKind::Delete, &["absent"]),
            document,
            None,
        )
        .unwrap();
        assert!(nothing.is_none());
    }
}

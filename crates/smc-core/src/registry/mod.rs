//! Persisted list registry
//!
//! Maps each [`ListRole`] to the identifier of the remote list the appliance
//! assigned when the list was created. The mapping lives in the injected
//! [`KeyValueStore`] under the role's local name, so a role is created at
//! most once across restarts.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use smc_core::registry::ListRegistry;
//! use smc_core::model::ListRole;
//!
//! let registry = ListRegistry::new(store);
//!
//! // Creates `dim_blocklist` on first use, no-op afterwards
//! let created = registry.ensure_list(api.as_ref(), ListRole::IP_BLOCKLIST, &[]).await?;
//! let id = registry.lookup(ListRole::IP_BLOCKLIST).await?;
//! ```

use std::sync::Arc;
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::model::{ListDocument, ListRole};
use crate::traits::{ApiRequest, ApiResponse, KeyValueStore, SmcApi, execute_with_reauth};

/// Registry of remote list identifiers
///
/// ## Thread Safety
///
/// All state lives in the store, which guards itself. Clones share it.
#[derive(Clone)]
pub struct ListRegistry {
    store: Arc<dyn KeyValueStore>,
}

impl ListRegistry {
    /// Create a registry over `store`
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// The backing store
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Remote identifier of `role`, if it has been created
    pub async fn lookup(&self, role: ListRole) -> Result<Option<String>> {
        self.store.get(role.local_name()).await
    }

    /// Make sure the remote list for `role` exists
    ///
    /// Does nothing (and touches no network) when the role already has an
    /// identifier. Otherwise creates the list; URL lists are created with
    /// `initial_items` as their entries, IP lists are created empty.
    ///
    /// # Returns
    ///
    /// - `Ok(true)`: The list was created by this call
    /// - `Ok(false)`: The list already existed
    /// - `Err(Error::Remote)`: Creation was rejected (including a repeated 401)
    /// - `Err(Error::Protocol)`: The 201 response had no usable `Location`
    pub async fn ensure_list(
        &self,
        api: &dyn SmcApi,
        role: ListRole,
        initial_items: &[String],
    ) -> Result<bool> {
        if let Some(id) = self.lookup(role).await? {
            debug!("List {} already registered as {}", role, id);
            return Ok(false);
        }

        let document = ListDocument::for_creation(role, initial_items);
        let request = ApiRequest::post(role.list_type()).json(serde_json::to_value(&document)?);

        let response = execute_with_reauth(api, &request, "list creation").await?;
        if response.status != 201 {
            return Err(Error::remote(
                response.status,
                format!("creating list {}", role),
            ));
        }

        let id = created_id(&response)?;
        info!("Created list {} with id {}", role, id);
        self.register(role, &id).await?;

        Ok(true)
    }

    /// Record `id` for `role` and persist the store
    ///
    /// A failed persist is logged only; the id stays registered in memory.
    pub async fn register(&self, role: ListRole, id: &str) -> Result<()> {
        self.store.set(role.local_name(), id).await?;
        if let Err(e) = self.store.persist().await {
            error!("Failed to persist registry entry for {}: {}", role, e);
        }
        Ok(())
    }
}

/// Identifier of a created resource: the `Location` segment after the last `/`
fn created_id(response: &ApiResponse) -> Result<String> {
    let location = response
        .header("location")
        .ok_or_else(|| Error::protocol("list creation response has no Location header"))?;

    match location.rsplit('/').next() {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => Err(Error::protocol(format!(
            "cannot extract list id from Location {:?}",
            location
        ))),
    }
}

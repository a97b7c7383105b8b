//! Factory and station resource handles.
//!
//! Factories group stations; stations are the broker's persistent message
//! streams. Both are pure control-plane resources here: the handles carry
//! no transport state, only the name and a connection handle for the HTTP
//! calls. Names are lower-cased on creation so destination subjects stay
//! consistent regardless of caller casing.

use tracing::info;

use crate::config::StationOptions;
use crate::connection::ConnectionHandle;
use crate::error::Result;

/// A logical grouping of stations
pub struct Factory {
    name: String,
    handle: ConnectionHandle,
}

impl Factory {
    pub(crate) async fn create(
        handle: ConnectionHandle,
        name: &str,
        description: &str,
    ) -> Result<Self> {
        let name = name.to_lowercase();
        let token = handle.access_token().await?;
        handle.api().create_factory(&token, &name, description).await?;
        info!(factory = %name, "factory created");
        Ok(Self { name, handle })
    }

    pub(crate) fn attach(handle: ConnectionHandle, name: &str) -> Self {
        Self {
            name: name.to_lowercase(),
            handle,
        }
    }

    /// Factory name (lower-cased)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remove this factory from the control plane
    pub async fn destroy(&self) -> Result<()> {
        let token = self.handle.access_token().await?;
        self.handle.api().remove_factory(&token, &self.name).await
    }
}

/// A named persistent message stream on the broker
pub struct Station {
    name: String,
    factory_name: Option<String>,
    handle: ConnectionHandle,
}

impl Station {
    pub(crate) async fn create(
        handle: ConnectionHandle,
        name: &str,
        factory_name: &str,
        options: StationOptions,
    ) -> Result<Self> {
        let name = name.to_lowercase();
        let factory_name = factory_name.to_lowercase();
        let token = handle.access_token().await?;
        handle
            .api()
            .create_station(&token, &name, &factory_name, &options)
            .await?;
        info!(station = %name, factory = %factory_name, "station created");
        Ok(Self {
            name,
            factory_name: Some(factory_name),
            handle,
        })
    }

    pub(crate) fn attach(handle: ConnectionHandle, name: &str) -> Self {
        Self {
            name: name.to_lowercase(),
            factory_name: None,
            handle,
        }
    }

    /// Station name (lower-cased)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Factory this station was created under (lower-cased). Handles
    /// attached by name alone do not carry it.
    pub fn factory_name(&self) -> Option<&str> {
        self.factory_name.as_deref()
    }

    /// Remove this station from the control plane
    pub async fn destroy(&self) -> Result<()> {
        let token = self.handle.access_token().await?;
        self.handle.api().remove_station(&token, &self.name).await
    }
}

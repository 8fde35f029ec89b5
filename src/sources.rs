use anyhow::Result;
use serde::{Deserialize, Serialize};

/// One fleet registry entry. Several entries may share an `fqdn` when more
/// than one wallet claims the same gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayHost {
    pub fqdn: String,
    pub wallet: String,
}

/// Bounds of the epoch being audited, in block heights.
#[allow(async_fn_in_trait)]
pub trait EpochHeightSource {
    async fn epoch_start_height(&self) -> Result<u64>;
    async fn epoch_end_height(&self) -> Result<u64>;
}

/// Provider of a name list to assess. `height` pins the list to an epoch
/// boundary for providers that derive names from chain state.
#[allow(async_fn_in_trait)]
pub trait ArnsNamesSource {
    async fn names(&self, height: Option<u64>) -> Result<Vec<String>>;
}

/// Provider of the gateway fleet registry.
#[allow(async_fn_in_trait)]
pub trait GatewayHostsSource {
    async fn hosts(&self) -> Result<Vec<GatewayHost>>;
}

/// Fixed epoch bounds taken from settings.
#[derive(Debug, Clone)]
pub struct StaticEpochSource {
    start_height: u64,
    end_height: u64,
}

impl StaticEpochSource {
    pub fn new(start_height: u64, end_height: u64) -> Self {
        Self {
            start_height,
            end_height,
        }
    }
}

impl EpochHeightSource for StaticEpochSource {
    async fn epoch_start_height(&self) -> Result<u64> {
        Ok(self.start_height)
    }

    async fn epoch_end_height(&self) -> Result<u64> {
        Ok(self.end_height)
    }
}

/// Fixed name list; the height hint is ignored.
#[derive(Debug, Clone)]
pub struct StaticNamesSource {
    names: Vec<String>,
}

impl StaticNamesSource {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }
}

impl ArnsNamesSource for StaticNamesSource {
    async fn names(&self, _height: Option<u64>) -> Result<Vec<String>> {
        Ok(self.names.clone())
    }
}

/// Fixed fleet registry taken from settings.
#[derive(Debug, Clone)]
pub struct StaticGatewayHostsSource {
    hosts: Vec<GatewayHost>,
}

impl StaticGatewayHostsSource {
    pub fn new(hosts: Vec<GatewayHost>) -> Self {
        Self { hosts }
    }
}

impl GatewayHostsSource for StaticGatewayHostsSource {
    async fn hosts(&self) -> Result<Vec<GatewayHost>> {
        Ok(self.hosts.clone())
    }
}

//! Upstream registry integrations.

pub mod fetch_client {
    pub use crate::fetch_client::*;
}

pub mod proxy_pool {
    pub use crate::proxy_pool::*;
}

pub mod sources {
    pub use crate::sources::*;
}

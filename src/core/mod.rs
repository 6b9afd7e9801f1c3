// Domain-layer modules and shared errors/models
pub mod models {
    pub use crate::models::*;
}

pub mod normalization {
    pub use crate::normalization::*;
}

pub mod scoring {
    pub use crate::scoring::*;
}

pub mod errors {
    pub use crate::errors::*;
}

mod client;

pub use client::{CloudClient, CloudError, DEFAULT_REQUEST_TIMEOUT, Preview, ShareEntry};

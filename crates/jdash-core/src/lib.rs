pub mod api;
pub mod delta;
pub mod errors;
pub mod rpc;
pub mod snapshot;
pub mod status;
pub mod store;

use serde::{Deserialize, Deserializer};

/// The server sends `null` for empty maps and lists.
pub(crate) fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

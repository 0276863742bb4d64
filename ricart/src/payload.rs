/// Application message exchanged between processes alongside the protocol,
/// such as the work performed inside the critical section.
pub trait Payload: Send
    + Sync
    + Clone
    + std::fmt::Debug
    + serde::Serialize
    + serde::de::DeserializeOwned
    + 'static
{
}

impl<T> Payload for T where T: Send
    + Sync
    + Clone
    + std::fmt::Debug
    + serde::Serialize
    + serde::de::DeserializeOwned
    + 'static
{
}

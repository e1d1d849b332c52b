pub(crate) mod pesaflux;
pub(crate) mod poller;
pub(crate) mod reconciler;

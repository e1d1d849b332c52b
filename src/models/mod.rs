pub(crate) mod transaction;

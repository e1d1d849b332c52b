pub(crate) mod payments;

// -
// Host module

/// Import namespace the guest links host functions against
pub const HOST_MODULE_NAME: &str = "range-watch";

/// Host function names, as imported by the guest
pub const FN_FLUSH: &str = "__range_watch_flush";
pub const FN_OPEN: &str = "__range_watch_open";
pub const FN_START: &str = "__range_watch_start";
pub const FN_STOP: &str = "__range_watch_stop";
pub const FN_CREATE: &str = "__range_watch_create";
pub const FN_DELETE: &str = "__range_watch_delete";

// -
// Guest exports

/// No-argument export returning the pointer to the meta table
pub const DEFAULT_META_EXPORT: &str = "__range_watch";

/// No-argument export invoked once per delivered value
pub const DEFAULT_RECEIVE_EXPORT: &str = "__range_watch_recv";

// -
// Wire layout

/// Number of little-endian u32 fields in the meta table (protocol v1)
pub(crate) const META_FIELD_COUNT: u32 = 7;

/// Size of the big-endian length prefix in front of each key-list record
pub const RECORD_HEADER_LEN: usize = 2;

/// Records carried by Open and Create: id, from, to
pub(crate) const OPEN_ARG_COUNT: usize = 3;

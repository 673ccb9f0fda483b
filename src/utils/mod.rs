mod models;

pub(crate) use self::models::alloc;
pub(crate) use self::models::spin;
pub(crate) use self::models::sync;

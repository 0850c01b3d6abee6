//! Persisting produced items.

use tracing::{debug, error};

use crate::error::PersistError;
use crate::models::ObjectRef;

/// Anything that can be saved once mapped.
pub trait Persistable {
    fn save(&self) -> Result<(), PersistError>;

    /// Short description used in logs.
    fn describe(&self) -> String;
}

impl Persistable for ObjectRef {
    fn save(&self) -> Result<(), PersistError> {
        ObjectRef::save(self)
    }

    fn describe(&self) -> String {
        format!("{:?}", self)
    }
}

/// Save one item. Failures are logged with the item, then returned.
pub fn each<P: Persistable + ?Sized>(item: &P) -> Result<(), PersistError> {
    match item.save() {
        Ok(()) => {
            debug!(item = %item.describe(), "item saved");
            Ok(())
        }
        Err(e) => {
            error!(item = %item.describe(), error = %e, "failed to save item");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ObjectType;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_each_calls_save_hook() {
        let saved = Arc::new(AtomicUsize::new(0));
        let counter = saved.clone();
        let ty = ObjectType::builder("Track")
            .field("title")
            .on_save(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .build();

        let item = ObjectRef::new(ty.instantiate());
        each(&item).unwrap();
        each(&item).unwrap();
        assert_eq!(saved.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_each_without_save_capability() {
        let item = ObjectRef::new(ObjectType::new("Plain", ["a"]).instantiate());
        let err = each(&item).unwrap_err();
        assert!(matches!(err, PersistError::Unsupported(ref name) if name == "Plain"));
    }

    #[test]
    fn test_each_propagates_save_failure() {
        let ty = ObjectType::builder("Broken")
            .on_save(|_| Err("disk full".to_string()))
            .build();
        let item = ObjectRef::new(ty.instantiate());
        let err = each(&item).unwrap_err();
        assert!(err.to_string().contains("disk full"));
    }
}

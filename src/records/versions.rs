use super::RecordError;
use crate::store::{DocumentStore, Filter, StoreError};
use keepalive_core::types::{new_id, VersionDescriptor, VERSIONS};

fn key_filter(family: &str, protocol: i32) -> Filter {
    Filter::new().eq("family", family).eq("protocol", protocol)
}

/// Register a protocol number. Fails if the family already maps it.
pub fn add_version(
    store: &DocumentStore,
    family: &str,
    protocol: i32,
    name: &str,
) -> Result<VersionDescriptor, RecordError> {
    let descriptor = VersionDescriptor {
        id: new_id(),
        family: family.trim().to_ascii_lowercase(),
        protocol,
        name: name.trim().to_string(),
    };

    match store.create_unique_record(&key_filter(&descriptor.family, protocol), &descriptor) {
        Ok(()) => {
            log::info!("Registered {} protocol {} as '{}'", descriptor.family, protocol, descriptor.name);
            Ok(descriptor)
        }
        Err(StoreError::DuplicateKey(_)) => Err(RecordError::DuplicateVersion {
            family: descriptor.family,
            protocol,
        }),
        Err(e) => Err(e.into()),
    }
}

pub fn lookup_version(store: &DocumentStore, family: &str, protocol: i32) -> Option<VersionDescriptor> {
    store.find_one_as(&key_filter(family, protocol))
}

pub fn remove_version(store: &DocumentStore, id: &str) -> bool {
    store.delete_one(VERSIONS, &Filter::by_id(id))
}

/// All known versions, grouped by family and ordered by protocol number.
pub fn list_versions(store: &DocumentStore) -> Vec<VersionDescriptor> {
    let mut versions: Vec<VersionDescriptor> = store.read_as();
    versions.sort_by(|a, b| a.family.cmp(&b.family).then(a.protocol.cmp(&b.protocol)));
    versions
}

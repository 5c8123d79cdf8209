use crate::types::ManagedTarget;

/// Prefix of auto-assigned target names.
pub const NAME_PREFIX: &str = "S-";

/// Name for the target at zero-based `index` in its owner's list.
pub fn sequence_name(index: usize) -> String {
    format!("{}{}", NAME_PREFIX, index + 1)
}

/// Order one owner's targets by creation and renumber them `S-1..S-n`.
///
/// Returns `(target_id, new_name)` for every target whose name changed.
pub fn compact_names(targets: &mut [ManagedTarget]) -> Vec<(String, String)> {
    targets.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

    let mut renamed = Vec::new();
    for (index, target) in targets.iter_mut().enumerate() {
        let name = sequence_name(index);
        if target.name != name {
            target.name = name.clone();
            renamed.push((target.id.clone(), name));
        }
    }
    renamed
}

use crate::errors::HprofDelveError;
use crate::heap::store::ObjectStore;
use crate::utils::ProgressSink;

const PROGRESS_STRIDE: u32 = 50_000;

/// One streaming pass over all objects, counting for every id32 how many
/// objects reference it. Null targets and referents outside the address map
/// are skipped. Static-field edges from class objects are included, matching
/// what the retained-size engine later expands through. Counters saturate at
/// `u32::MAX`; an object shared that widely has no meaningful retained size
/// anyway.
pub fn build_inbound_counts(
    store: &ObjectStore,
    progress: &mut ProgressSink,
) -> Result<Vec<u32>, HprofDelveError> {
    let total = store.ids_len();
    let mut counts = vec![0u32; total as usize];
    let mut scratch: Vec<u64> = Vec::new();

    for id32 in 0..total {
        scratch.clear();
        store.read_outbound(id32, &mut scratch)?;
        for &target in &scratch {
            if let Some(k) = store.addresses().id32_of(target) {
                counts[k as usize] = counts[k as usize].saturating_add(1);
            }
        }
        if id32 % PROGRESS_STRIDE == 0 {
            progress.report(
                f64::from(id32) / f64::from(total.max(1)),
                "Building inbound reference index",
            );
        }
    }
    progress.report(1.0, "Building inbound reference index");
    Ok(counts)
}

use gsl_types::{AResult, GslError};

/// Runs the two-step null-then-sized-buffer pattern every real ACDB query
/// uses (probe for the required size, then fill an owned buffer of that
/// size) and returns an owned `Vec<u8>`, removing the foot-gun of callers
/// re-implementing the probe/allocate/fill dance at each call site.
pub fn acdb_call_owned(
    probe_size: impl FnOnce() -> AResult<usize>,
    fill: impl FnOnce(&mut [u8]) -> AResult<()>,
) -> AResult<Vec<u8>> {
    let size = probe_size()?;
    if size == 0 {
        return Ok(Vec::new());
    }
    let mut buf = vec![0u8; size];
    fill(&mut buf).map_err(|err| match err {
        GslError::NotFound => GslError::NotFound,
        other => other,
    })?;
    Ok(buf)
}

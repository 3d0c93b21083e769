//! Precision tie-break between the newest tag and the newest tag written
//! like the current one.

use super::filter::same_precision;
use super::session::ResolutionSession;
use crate::error::Result;
use crate::tag::Tag;
use tracing::debug;

/// Pick between `latest` and `latest_same_precision` given their digests.
///
/// The less precise tag wins only when the registry confirms both point at the
/// same image and it is a prefix of `latest` (`1.3` for `1.3.2`). Unknown
/// digests never count as equal.
pub fn choose(
    latest: Tag,
    latest_same_precision: Tag,
    latest_digest: Option<&str>,
    same_precision_digest: Option<&str>,
) -> Tag {
    let same_image = matches!(
        (latest_digest, same_precision_digest),
        (Some(a), Some(b)) if a == b
    );
    if same_image && latest_same_precision.is_same_but_less_precise(&latest) {
        latest_same_precision
    } else {
        latest
    }
}

/// Resolve which of `candidates` (sorted, last is newest) to report when the
/// newest one is more precise than `current`.
pub(crate) async fn reconcile(
    session: &mut ResolutionSession,
    candidates: &[Tag],
    latest: Tag,
    current: &Tag,
) -> Result<Tag> {
    if latest.has_same_precision(current) {
        return Ok(latest);
    }

    let Some(latest_same_precision) = same_precision(candidates, current).pop() else {
        return Ok(latest);
    };

    let same_precision_digest = session.digest_of(latest_same_precision.name()).await?;
    let latest_digest = session.digest_of(latest.name()).await?;
    debug!(
        latest = %latest,
        latest_same_precision = %latest_same_precision,
        ?latest_digest,
        ?same_precision_digest,
        "comparing digests across precision"
    );

    Ok(choose(
        latest,
        latest_same_precision,
        latest_digest.as_deref(),
        same_precision_digest.as_deref(),
    ))
}

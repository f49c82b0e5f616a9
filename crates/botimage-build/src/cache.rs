//! Day-keyed jumpstart cache lookup.

use botimage_core::{ImageNaming, ImageRef};
use botimage_engine::{Buildah, CommandExecutor, EngineError};
use chrono::NaiveDate;

/// Today's jumpstart image, if one is in local storage.
///
/// The cache key is `(image name, calendar day)`; a miss is `Ok(None)`.
pub async fn find_jumpstart<E: CommandExecutor>(
    buildah: &Buildah<E>,
    naming: &ImageNaming,
    date: NaiveDate,
) -> Result<Option<ImageRef>, EngineError> {
    let key = naming.jumpstart_ref(date);
    let hit = buildah.find_image(&key).await?;
    match &hit {
        Some(image) => tracing::info!(image = %image, "jumpstart cache hit"),
        None => tracing::info!(image = %key, "jumpstart cache miss"),
    }
    Ok(hit)
}

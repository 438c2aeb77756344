//! On-demand dish images.
//!
//! Independent of any analysis stream: the client asks for one image per
//! dish, whenever it likes, using the dish's `image_prompt`.

use crate::config::AnalysisConfig;
use crate::error::{DishcoveryError, UpstreamError};
use crate::prompts::decorate_image_prompt;
use crate::upstream::Services;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Generate an image for one dish and return its URL.
///
/// The prompt is trimmed and the configured style suffix appended before it
/// is sent. An empty prompt is rejected without calling the generator.
pub async fn generate_dish_image(
    image_prompt: &str,
    services: &Services,
    config: &AnalysisConfig,
) -> Result<String, DishcoveryError> {
    if image_prompt.trim().is_empty() {
        return Err(DishcoveryError::InvalidRequest(
            "image_prompt must not be empty".into(),
        ));
    }

    let prompt = decorate_image_prompt(image_prompt, &config.image_style_suffix);
    let limit = Duration::from_secs(config.api_timeout_secs);
    let start = Instant::now();
    info!("Generating dish image with {}", config.image_model);

    let result = match tokio::time::timeout(limit, services.images.generate(&prompt)).await {
        Ok(result) => result,
        Err(_) => Err(UpstreamError::Timeout {
            elapsed_ms: limit.as_millis() as u64,
        }),
    };

    match result {
        Ok(url) => {
            info!("Dish image ready in {}ms", start.elapsed().as_millis());
            Ok(url)
        }
        Err(source) => {
            warn!("Dish image generation failed: {}", source);
            Err(DishcoveryError::ImageGeneration { source })
        }
    }
}

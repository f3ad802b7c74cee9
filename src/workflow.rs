//! Analysis workflows: what to ask the model for and how to pace it.
//!
//! Each [`Workflow`] carries its instruction text, the [`OutputMode`] its
//! answer is parsed with, and a default [`BatchProfile`]. The profiles are
//! per-provider throughput guesses, not derived from any formula, and can be
//! overridden in `framebatch.toml` or on the command line.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::analysis::OutputMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Workflow {
    /// Camera-motion prompt for image-to-video generators.
    Prompt,
    /// Plain-language description of the image.
    Description,
    /// Stock-photo title, keywords and category as JSON.
    Metadata,
}

impl fmt::Display for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Workflow::Prompt => write!(f, "prompt"),
            Workflow::Description => write!(f, "description"),
            Workflow::Metadata => write!(f, "metadata"),
        }
    }
}

/// Wave size and cooldown for one workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProfile {
    pub batch_size: usize,
    pub inter_batch_delay_ms: u64,
}

impl BatchProfile {
    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_batch_delay_ms)
    }
}

impl Workflow {
    pub fn output_mode(&self) -> OutputMode {
        match self {
            Workflow::Prompt | Workflow::Description => OutputMode::Text,
            Workflow::Metadata => OutputMode::Structured,
        }
    }

    pub fn max_tokens(&self) -> u32 {
        match self {
            Workflow::Prompt => 300,
            Workflow::Description => 600,
            Workflow::Metadata => 1024,
        }
    }

    pub fn default_profile(&self) -> BatchProfile {
        match self {
            Workflow::Metadata => BatchProfile {
                batch_size: 10,
                inter_batch_delay_ms: 2000,
            },
            Workflow::Prompt | Workflow::Description => BatchProfile {
                batch_size: 6,
                inter_batch_delay_ms: 1000,
            },
        }
    }

    pub fn instruction(&self) -> &'static str {
        match self {
            Workflow::Prompt => concat!(
                "You write prompts for an image-to-video model in the style used by Runway. ",
                "Study the image and describe, in one paragraph under 60 words, the camera ",
                "movement, subject motion and atmosphere that would bring it to life. ",
                "Start with the camera movement. Do not describe what is static. ",
                "Return only the prompt text, without quotes or preamble."
            ),
            Workflow::Description => concat!(
                "Describe this image in two to four sentences: the main subject, the setting, ",
                "lighting and mood, and any notable colours or composition. ",
                "Return only the description."
            ),
            Workflow::Metadata => concat!(
                "Produce stock-photo metadata for this image. Respond with ONLY valid JSON, ",
                "no other text.\n",
                "Format: {\"title\": \"<descriptive title under 200 characters>\", ",
                "\"keywords\": [\"<keyword>\", ...], \"category\": \"<category>\"}\n",
                "Rules:\n",
                "- keywords: 30 to 49 single words or short phrases, most relevant first\n",
                "- no brand names, no people's names, no trademarks\n",
                "- category: one broad stock category such as Nature, Business or Travel"
            ),
        }
    }
}

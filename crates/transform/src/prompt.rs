//! Style preset prompts.

use sketchforge_core::Style;

/// The generation prompt for a style preset.
pub fn style_prompt(style: Style) -> &'static str {
    match style {
        Style::Cartoon => {
            "Convert the uploaded children's drawing into a clean, 2-D hand-drawn \
             cartoon. Keep every line, shape, and character exactly where the child \
             placed them, but redraw with smooth bold outlines, flat vibrant colors, \
             and minimal shading. Preserve the whimsical imperfections so it still \
             feels like a kid's artwork in polished Saturday-morning-cartoon style."
        }
        Style::Pixar => {
            "Transform the uploaded children's drawing into a high-quality 3-D \
             animated-film scene. Maintain the original layout, proportions, and \
             color placement of every character and object. Rebuild them with soft \
             rounded geometry, expressive eyes, gentle subsurface lighting, and a \
             cheerful cinematic palette that clearly echoes the child's design."
        }
        Style::Realistic => {
            "Bring the uploaded children's drawing to life in a semi-realistic \
             storybook illustration. Keep the exact composition and whimsical \
             shapes, but add believable textures, depth, and dynamic lighting. Use \
             rich painterly brushstrokes and subtle gradients so the scene feels \
             tangible while retaining the playful spirit of the original art."
        }
    }
}

/// Prompt for the vision analysis stage: asks the model to describe the
/// drawing in terms suitable for the generation stage.
pub fn analysis_prompt(style: Style) -> String {
    format!(
        "Analyze this drawing and produce a detailed description for generating a \
         transformed version. {} Capture the main subject, the setting and \
         background elements, the requested artistic style ({}), and specific \
         visual details and composition. Respond with a visual description \
         suitable for image generation.",
        style_prompt(style),
        style
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompts_are_distinct_per_style() {
        let prompts: Vec<_> = Style::ALL.iter().map(|s| style_prompt(*s)).collect();
        assert_ne!(prompts[0], prompts[1]);
        assert_ne!(prompts[1], prompts[2]);
    }

    #[test]
    fn analysis_prompt_names_the_style() {
        assert!(analysis_prompt(Style::Pixar).contains("pixar"));
    }
}

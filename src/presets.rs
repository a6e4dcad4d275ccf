use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PresetPrompt {
    pub name: &'static str,
    pub prompt: &'static str,
}

const PRESETS: &[PresetPrompt] = &[
    PresetPrompt {
        name: "Luxury product showcase",
        prompt: "A luxurious, refined studio shot of the product with soft, directional lighting that highlights its premium features. The base is a minimal glossy surface reflecting the product, set against a deep, rich color gradient. Add a subtle wisp of steam or mist for a dreamy feel. The product sits in the center, in perfect focus.",
    },
    PresetPrompt {
        name: "Fresh, nature inspired",
        prompt: "The product placed in a vivid natural setting, surrounded by lush greenery and crystal-clear water droplets. Gentle sunlight filters through the leaves, creating a fresh, invigorating atmosphere. Emphasize organic textures and a sense of natural purity. The product should feel fresh and close to nature.",
    },
    PresetPrompt {
        name: "Modern minimalist",
        prompt: "A clean, modern, minimal composition with the product standing out on a pure white or light grey background. Use geometric shapes and subtle shadows to create depth. The product is the only focal point, with crisp detail and refined simplicity. Even, bright lighting.",
    },
    PresetPrompt {
        name: "Dynamic action shot",
        prompt: "The product in a dynamic, energetic environment that suggests motion and performance: splashing water, floating particles or a speed-blurred background. Use strong, dramatic lighting for visual impact. The product should convey power and performance.",
    },
    PresetPrompt {
        name: "Cosy home setting",
        prompt: "A warm, inviting scene with the product integrated into a cosy domestic space. Soft, diffused light from a window or lamp. Textures of natural wood, soft fabric or warm ceramics. Convey comfort, relaxation and everyday luxury. The product should feel approachable and essential.",
    },
    PresetPrompt {
        name: "Futuristic augmented reality",
        prompt: "The product presented in a sophisticated augmented-reality environment with glowing, interactive 3D graphic overlays. Transparent virtual interfaces float in the air, highlighting key features. Electric blue and neon purple light creates a high-tech atmosphere. The product looks like a flawless virtual object integrated into the real world.",
    },
    PresetPrompt {
        name: "Interactive virtual try-on",
        prompt: "The product appears as a virtual try-on item on a person interacting with it, through a mirror display or in mid-air. Emphasize how seamless and realistic the digital experience is. The background is a clean, modern studio with soft light, focused on the connection between the user and the virtual product.",
    },
    PresetPrompt {
        name: "Interactive product display",
        prompt: "The product stands on a digital display pedestal where information, motion graphics and product highlights appear and transform around it. Focused lighting highlights the product's innovation. The background is a minimal technology exhibition space with clean lines and ambient light.",
    },
    PresetPrompt {
        name: "Sustainable, eco-friendly tech",
        prompt: "A modern tech product presented in a green, organic setting that evokes sustainability and environmental responsibility: recycled materials, plants or natural sunlight. Earth tones and greens dominate. The product should look in harmony with nature while still appearing advanced.",
    },
    PresetPrompt {
        name: "Minimal digital design",
        prompt: "An ultra-minimal composition where the product is lit perfectly and stands out on a glossy monochrome surface. Soft, carefully shaped shadows create depth. Only basic lines and shapes are used. Strong focused light brings out every small detail of the product, showing the finesse of its digital design.",
    },
];

pub fn presets() -> &'static [PresetPrompt] {
    PRESETS
}

pub fn preset(name: &str) -> Option<&'static PresetPrompt> {
    PRESETS.iter().find(|p| p.name.eq_ignore_ascii_case(name.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(presets().len(), 10);
        assert!(preset("modern MINIMALIST").is_some());
        assert!(preset("no such preset").is_none());
    }
}

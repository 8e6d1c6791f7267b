/// Style identifier routed to the iterative optimization engine.
pub const CUSTOM_STYLE: &str = "style_custom";

/// A style the bot offers on its keyboard.
#[derive(Debug, Clone)]
pub struct StyleDef {
    pub id: &'static str,
    pub label: &'static str,
}

/// Keyboard order is catalog order; the custom style comes last.
pub static STYLE_CATALOG: &[StyleDef] = &[
    StyleDef {
        id: "style_monet",
        label: "Claude Monet",
    },
    StyleDef {
        id: "style_vangogh",
        label: "Vincent van Gogh",
    },
    StyleDef {
        id: "style_cezanne",
        label: "Paul Cézanne",
    },
    StyleDef {
        id: "style_ukiyoe",
        label: "Ukiyo-e",
    },
    StyleDef {
        id: CUSTOM_STYLE,
        label: "Custom",
    },
];

impl StyleDef {
    pub fn find_by_id(id: &str) -> Option<&'static StyleDef> {
        STYLE_CATALOG.iter().find(|s| s.id == id)
    }

    pub fn is_custom(&self) -> bool {
        self.id == CUSTOM_STYLE
    }
}

/// Ids of the styles served by pretrained generators.
pub fn fixed_style_ids() -> impl Iterator<Item = &'static str> {
    STYLE_CATALOG.iter().filter(|s| !s.is_custom()).map(|s| s.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_lookup() {
        assert!(StyleDef::find_by_id("style_custom").unwrap().is_custom());
        assert_eq!(StyleDef::find_by_id("style_monet").unwrap().label, "Claude Monet");
        assert!(StyleDef::find_by_id("style_picasso").is_none());
    }

    #[test]
    fn test_fixed_styles_exclude_custom() {
        let fixed: Vec<_> = fixed_style_ids().collect();
        assert_eq!(fixed, vec!["style_monet", "style_vangogh", "style_cezanne", "style_ukiyoe"]);
    }
}

const BASE_URL: &str = "https://eyecannndy.com/technique/";

/// Full technique catalogue, in the order the site lists them. Runs and
/// checkpoint cursors both assume this order stays stable between runs.
pub const TECHNIQUES: &[&str] = &[
    "aerial", "anthropomorphism", "arc-movement", "architexture", "as-object",
    "aspect-ratio-switch", "bolt-cam", "boomerang", "breakdown", "bullet-time",
    "camera-roll", "choreo", "cinemagraph", "close-up", "collage", "color-shift",
    "conveyor", "cut-ins", "datamosh", "distortions", "dolly-shot", "dolly-zoom",
    "dreamcore", "duplication", "dutch-angle", "dystopian", "falling", "fisheye",
    "flash-cut", "floating", "focal-focus", "focal-shift", "fourth-wall",
    "fpv-drone", "generative", "glitch", "ground-shot", "halation", "hard-light",
    "haze", "high-angle", "infinite", "interview", "jump-cut", "lazy-susan",
    "light-flash", "locked-on", "low-angle", "masking", "match-cut", "match-split",
    "maximalism", "model", "morphing", "overhead", "pan", "parallax", "pedestal",
    "pixel-art", "probe-lens", "product", "quick-cuts", "shadow-box", "shaky-cam",
    "silhouette", "slit-scan", "snorricam", "spotlight", "stutter", "surrealism",
    "thermal", "tilt-shift", "tilt", "tracking", "transition", "trip", "trucking",
    "two-shot", "typography", "underwater", "vhs", "video-game", "vignette",
    "void", "voyeur", "wandering", "whip-pan", "wide-shot", "wierdcore",
    "wigglegram", "worms-eye", "x-ray", "zoetrope", "zoom-in",
];

pub fn page_url(slug: &str) -> String {
    format!("{BASE_URL}{slug}")
}

/// Technique slug for a page URL, used to bucket downloads by folder.
/// Anything that doesn't look like a technique page goes to "unknown".
pub fn technique_from_page_url(page_url: &str) -> String {
    match page_url.split("/technique/").nth(1) {
        Some(rest) => {
            let slug = rest.split(['?', '#']).next().unwrap_or(rest);
            let slug = slug.trim_end_matches('/');
            if slug.is_empty() {
                "unknown".to_string()
            } else {
                slug.to_string()
            }
        }
        None => "unknown".to_string(),
    }
}

// ── Tests ──

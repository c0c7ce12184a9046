//! Deterministic image-intent signals.
//!
//! Tokens are matched against stem prefixes: an action root ("draw",
//! "çiz") scores 0.4, an object root ("image", "resim") scores 0.4, and
//! both together add a 0.2 bonus. A stop phrase forces the score to 0.

/// Verbs asking for something to be produced
const ACTION_ROOTS: &[&str] = &[
    "draw", "paint", "generat", "creat", "mak", "render", "sketch", "illustrat", "design", "çiz", "ciz",
    "oluştur", "olustur", "üret", "uret", "tasarla",
];

/// Nouns naming a visual artifact
const OBJECT_ROOTS: &[&str] = &[
    "imag", "pictur", "resm", "photo", "portrait", "logo", "wallpaper", "poster", "avatar", "icon", "resim",
    "görsel", "gorsel", "fotoğraf", "fotograf", "görüntü", "goruntu", "afiş", "afis", "çizim",
];

/// Phrases that use image vocabulary without asking for an image
const STOP_PHRASES: &[&str] = &[
    "painted my house",
    "paint my house",
    "painting the house",
    "draw a conclusion",
    "draw conclusions",
    "draw attention",
    "make sense",
    "public image",
    "brand image",
    "image processing",
    "picture this",
    "big picture",
    "photo booth",
    "docker image",
    "disk image",
];

pub const ACTION_WEIGHT: f32 = 0.4;
pub const OBJECT_WEIGHT: f32 = 0.4;
pub const COMBINED_BONUS: f32 = 0.2;

/// Rules score in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuleScore {
    pub score: f32,
    pub action: bool,
    pub object: bool,
    pub stop_phrase: bool,
}

fn tokens(message: &str) -> impl Iterator<Item = String> + '_ {
    message
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

fn matches_root(token: &str, roots: &[&str]) -> bool {
    roots.iter().any(|root| token.starts_with(root))
}

pub fn score(message: &str) -> RuleScore {
    let normalized = tooling::serialization::normalize_text(message);
    if STOP_PHRASES.iter().any(|p| normalized.contains(p)) {
        return RuleScore {
            score: 0.0,
            action: false,
            object: false,
            stop_phrase: true,
        };
    }

    let mut action = false;
    let mut object = false;
    for token in tokens(&normalized) {
        action |= matches_root(&token, ACTION_ROOTS);
        object |= matches_root(&token, OBJECT_ROOTS);
    }

    let mut score = 0.0;
    if action {
        score += ACTION_WEIGHT;
    }
    if object {
        score += OBJECT_WEIGHT;
    }
    if action && object {
        score += COMBINED_BONUS;
    }

    RuleScore {
        score: score.min(1.0),
        action,
        object,
        stop_phrase: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_and_object() {
        let s = score("Please draw me a picture of a cat");
        assert!(s.action && s.object);
        assert!((s.score - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_single_signal_is_gray() {
        let s = score("draw a cat in the snow");
        assert!(s.action && !s.object);
        assert!((s.score - 0.4).abs() < f32::EPSILON);
    }

    #[test]
    fn test_turkish_roots() {
        let s = score("Bana bir kedi resmi çizer misin?");
        assert!(s.action && s.object);
    }

    #[test]
    fn test_stop_phrase_overrides() {
        let s = score("I painted my house blue, can you make an image of the plan?");
        assert!(s.stop_phrase);
        assert_eq!(s.score, 0.0);
    }

    #[test]
    fn test_plain_question_scores_zero() {
        assert_eq!(score("What is the capital of Turkey?").score, 0.0);
    }
}

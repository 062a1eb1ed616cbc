use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Number of themes drawn for one batch.
pub const BATCH_SIZE: usize = 9;

/// A prompt theme: a short display label plus the phrase sent to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Theme {
    pub label: String,
    pub description: String,
}

impl Theme {
    pub fn new(label: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            description: description.into(),
        }
    }
}

const CATALOG: &[(&str, &str)] = &[
    // expression
    ("Happy smile", "happy smile, cheerful bright expression, joyful mood"),
    ("Serious look", "serious focused expression, determined look, intense gaze"),
    ("Surprised", "surprised shocked expression, wide eyes, amazed look"),
    ("Sad", "sad melancholic expression, tearful eyes, sorrowful mood"),
    ("Angry", "angry fierce expression, furrowed brows, intense emotion"),
    ("Shy", "shy bashful expression, blushing cheeks, timid look"),
    ("Playful", "playful mischievous expression, teasing smile, fun mood"),
    ("Confident", "confident proud expression, self-assured look, bold stance"),
    // pose
    ("Jumping", "jumping dynamic pose, mid-air action, energetic movement"),
    ("Sitting", "sitting relaxed pose, comfortable position, casual sitting"),
    ("Running", "running fast pose, speed motion, athletic movement"),
    ("Waving", "waving hand greeting, friendly gesture, welcoming pose"),
    ("Thinking", "thinking contemplative pose, hand on chin, pensive mood"),
    ("Dancing", "dancing graceful pose, elegant movement, rhythmic motion"),
    ("Arms crossed", "arms crossed pose, confident stance, assertive posture"),
    ("Stretching", "stretching pose, arms raised, relaxed awakening"),
    ("Peace sign", "peace sign pose, V gesture, cute friendly pose"),
    ("Heart hands", "heart shape hands pose, love gesture, cute expression"),
    // action
    ("Reading", "reading a book, focused on literature, studious pose"),
    ("Listening to music", "listening to music with headphones, enjoying melody, relaxed"),
    ("Drinking coffee", "drinking coffee, holding cup, cozy warm moment"),
    ("Taking a photo", "taking a photo with camera, photographer pose, focused"),
    ("Painting", "painting drawing art, creative artist pose, artistic"),
    ("Cooking", "cooking in kitchen, chef pose, culinary activity"),
    ("Working out", "exercising workout, athletic pose, fitness activity"),
    ("Gaming", "playing video games, gamer pose, focused on screen"),
    // background
    ("Cherry blossoms", "cherry blossom background, spring scenery, pink petals falling"),
    ("Beach", "beach ocean background, summer vibes, coastal scenery"),
    ("City at night", "city night skyline background, urban lights, modern setting"),
    ("Forest", "forest nature background, green trees, peaceful woodland"),
    ("Snowfall", "snowy winter background, falling snowflakes, cold weather"),
    ("Starry night", "starry night sky background, cosmic atmosphere, dreamy"),
    ("Cafe", "cozy cafe interior background, warm atmosphere, casual setting"),
    ("Classroom", "school classroom background, academic setting, student life"),
    // outfit
    ("Business suit", "formal business suit outfit, professional attire, elegant"),
    ("Casual wear", "casual everyday clothes, relaxed style, comfortable outfit"),
    ("Sportswear", "sportswear athletic outfit, gym clothes, active wear"),
    ("Party dress", "party dress fancy outfit, glamorous attire, celebration"),
    ("Traditional costume", "traditional cultural costume, heritage outfit, classic attire"),
    ("Winter coat", "winter coat warm outfit, cold weather attire, cozy clothes"),
];

/// The built-in theme catalog, in category order.
pub fn default_catalog() -> Vec<Theme> {
    CATALOG
        .iter()
        .map(|(label, description)| Theme::new(*label, *description))
        .collect()
}

#[derive(Debug, Clone)]
pub struct ThemePool {
    catalog: Vec<Theme>,
    rng: StdRng,
}

impl Default for ThemePool {
    fn default() -> Self {
        Self::new()
    }
}

impl ThemePool {
    pub fn new() -> Self {
        Self::with_catalog(default_catalog(), StdRng::from_entropy())
    }

    /// Same catalog, reproducible draws.
    pub fn seeded(seed: u64) -> Self {
        Self::with_catalog(default_catalog(), StdRng::seed_from_u64(seed))
    }

    pub fn with_catalog(catalog: Vec<Theme>, rng: StdRng) -> Self {
        let mut seen = HashSet::new();
        let catalog = catalog
            .into_iter()
            .filter(|theme| seen.insert(theme.label.clone()))
            .collect();
        Self { catalog, rng }
    }

    pub fn catalog(&self) -> &[Theme] {
        self.catalog.as_slice()
    }

    pub fn len(&self) -> usize {
        self.catalog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalog.is_empty()
    }

    /// Draws `n` themes without replacement. Returns the whole catalog,
    /// shuffled, when `n` exceeds its size.
    pub fn sample(&mut self, n: usize) -> Vec<Theme> {
        self.catalog
            .choose_multiple(&mut self.rng, n)
            .cloned()
            .collect()
    }

    /// Like [`ThemePool::sample`], restricted to labels not in `used_labels`.
    pub fn sample_excluding<S: AsRef<str>>(&mut self, used_labels: &[S], n: usize) -> Vec<Theme> {
        let used: HashSet<&str> = used_labels.iter().map(AsRef::as_ref).collect();
        let available: Vec<&Theme> = self
            .catalog
            .iter()
            .filter(|theme| !used.contains(theme.label.as_str()))
            .collect();
        available
            .choose_multiple(&mut self.rng, n)
            .map(|theme| (*theme).clone())
            .collect()
    }
}

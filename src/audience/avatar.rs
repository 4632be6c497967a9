//! Pirate avatars: random generation, editing and the slot-machine spin.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::{Stream, StreamExt};
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

const MOUTH_COUNT: u8 = 3;
const EYE_OPTIONS: u8 = 3;
const EYE_COLORS: u8 = 4;
const NOSE_COUNT: u8 = 4;
const HAIR_OPTIONS: u8 = 3;
const HAIR_COLORS: u8 = 5;
const HAT_OPTIONS: u8 = 2;
const HAT_COLORS: u8 = 4;

const MALE_ACCESSORIES: [u8; 4] = [1, 2, 3, 4];
const FEMALE_ACCESSORIES: [u8; 3] = [1, 2, 3];
/// The one accessory that only exists for male avatars
const MALE_ONLY_ACCESSORY: u8 = 4;

const EYE_PATCH_CHANCE: f64 = 0.3;
// Bald and hatless weigh the same as each single style
const HAIR_CHANCE: f64 = 0.75;
const HAT_CHANCE: f64 = 2.0 / 3.0;

/// Spin phases as (frames, delay between frames in ms): fast to slow.
pub const SPIN_PHASES: [(usize, u64); 4] = [(8, 50), (6, 100), (4, 150), (3, 200)];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    #[default]
    Male,
    Female,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkinTone {
    Dark,
    Mid,
    #[default]
    Light,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EyePatch {
    Left,
    Right,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleChoice {
    pub option: u8,
    pub color: u8,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Accessories {
    pub regular: Vec<u8>,
    pub eye_patch: Option<EyePatch>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PirateAvatar {
    pub gender: Gender,
    pub skin_tone: SkinTone,
    pub mouth: u8,
    pub eyes: StyleChoice,
    pub nose: u8,
    pub accessories: Accessories,
    pub hair: Option<StyleChoice>,
    pub hat: Option<StyleChoice>,
}

impl PirateAvatar {
    pub fn serialize(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn deserialize(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// Same features, different skin.
    pub fn with_skin_tone(mut self, skin_tone: SkinTone) -> Self {
        self.skin_tone = skin_tone;
        self
    }

    /// Same features, different gender. Accessories the new gender does not
    /// have are removed.
    pub fn with_gender(mut self, gender: Gender) -> Self {
        if gender == Gender::Female {
            self.accessories.regular.retain(|a| *a != MALE_ONLY_ACCESSORY);
        }
        self.gender = gender;
        self
    }
}

fn style<R: Rng + ?Sized>(rng: &mut R, options: u8, colors: u8) -> StyleChoice {
    StyleChoice {
        option: rng.random_range(1..=options),
        color: rng.random_range(1..=colors),
    }
}

pub fn generate_random_avatar<R: Rng + ?Sized>(
    rng: &mut R,
    gender: Gender,
    skin_tone: SkinTone,
) -> PirateAvatar {
    let available: &[u8] = match gender {
        Gender::Male => &MALE_ACCESSORIES,
        Gender::Female => &FEMALE_ACCESSORIES,
    };
    let count = rng.random_range(0..=available.len());
    let regular = available.choose_multiple(rng, count).copied().collect();

    let eye_patch = if rng.random_bool(EYE_PATCH_CHANCE) {
        Some(if rng.random_bool(0.5) { EyePatch::Left } else { EyePatch::Right })
    } else {
        None
    };

    PirateAvatar {
        gender,
        skin_tone,
        mouth: rng.random_range(1..=MOUTH_COUNT),
        eyes: style(rng, EYE_OPTIONS, EYE_COLORS),
        nose: rng.random_range(1..=NOSE_COUNT),
        accessories: Accessories { regular, eye_patch },
        hair: rng.random_bool(HAIR_CHANCE).then(|| style(rng, HAIR_OPTIONS, HAIR_COLORS)),
        hat: rng.random_bool(HAT_CHANCE).then(|| style(rng, HAT_OPTIONS, HAT_COLORS)),
    }
}

pub fn random_avatar(gender: Gender, skin_tone: SkinTone) -> PirateAvatar {
    generate_random_avatar(&mut rand::rng(), gender, skin_tone)
}

struct Spin {
    rng: StdRng,
    gender: Gender,
    skin_tone: SkinTone,
    delays: std::vec::IntoIter<Duration>,
    pause: Option<Duration>,
    target: Option<PirateAvatar>,
}

/// Lazily yields the intermediate avatars of a spin, pausing between
/// frames, and ends on a target avatar drawn up front.
pub fn spin_frames(
    gender: Gender,
    skin_tone: SkinTone,
) -> impl Stream<Item = PirateAvatar> + Send {
    let mut rng = StdRng::from_rng(&mut rand::rng());
    let target = generate_random_avatar(&mut rng, gender, skin_tone);
    let delays: Vec<Duration> = SPIN_PHASES
        .iter()
        .flat_map(|(frames, millis)| {
            std::iter::repeat(Duration::from_millis(*millis)).take(*frames)
        })
        .collect();

    let spin = Spin {
        rng,
        gender,
        skin_tone,
        delays: delays.into_iter(),
        pause: None,
        target: Some(target),
    };

    futures::stream::unfold(spin, |mut spin| async move {
        if let Some(pause) = spin.pause.take() {
            tokio::time::sleep(pause).await;
        }

        match spin.delays.next() {
            Some(delay) => {
                spin.pause = Some(delay);
                let frame = generate_random_avatar(&mut spin.rng, spin.gender, spin.skin_tone);
                Some((frame, spin))
            }
            None => spin.target.take().map(|target| (target, spin)),
        }
    })
}

/// The avatar being edited on the join screen.
pub struct AvatarEditor {
    avatar: watch::Sender<PirateAvatar>,
    spinning: AtomicBool,
}

struct SpinGuard<'a>(&'a AtomicBool);

impl Drop for SpinGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl AvatarEditor {
    pub fn new(gender: Gender, skin_tone: SkinTone) -> Self {
        Self {
            avatar: watch::channel(random_avatar(gender, skin_tone)).0,
            spinning: AtomicBool::new(false),
        }
    }

    pub fn avatar(&self) -> PirateAvatar {
        self.avatar.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PirateAvatar> {
        self.avatar.subscribe()
    }

    pub fn is_spinning(&self) -> bool {
        self.spinning.load(Ordering::Acquire)
    }

    /// Reroll every feature. Gender and skin tone are kept unless given.
    pub fn randomize(&self, gender: Option<Gender>, skin_tone: Option<SkinTone>) {
        self.avatar.send_modify(|avatar| {
            let gender = gender.unwrap_or(avatar.gender);
            let skin_tone = skin_tone.unwrap_or(avatar.skin_tone);
            *avatar = random_avatar(gender, skin_tone);
        });
    }

    /// Run the slot-machine spin. Returns false without doing anything when
    /// a spin is already running.
    pub async fn spin_and_randomize(&self) -> bool {
        if self.spinning.swap(true, Ordering::AcqRel) {
            return false;
        }
        let _guard = SpinGuard(&self.spinning);

        let (gender, skin_tone) = {
            let avatar = self.avatar.borrow();
            (avatar.gender, avatar.skin_tone)
        };

        let mut frames = Box::pin(spin_frames(gender, skin_tone));
        while let Some(frame) = frames.next().await {
            self.avatar.send_replace(frame);
        }
        true
    }

    pub fn set_gender(&self, gender: Gender) {
        self.avatar.send_modify(|avatar| {
            *avatar = avatar.clone().with_gender(gender);
        });
    }

    pub fn set_skin_tone(&self, skin_tone: SkinTone) {
        self.avatar.send_modify(|avatar| avatar.skin_tone = skin_tone);
    }

    pub fn serialize(&self) -> serde_json::Result<String> {
        self.avatar.borrow().serialize()
    }

    pub fn load(&self, raw: &str) -> serde_json::Result<()> {
        let avatar = PirateAvatar::deserialize(raw)?;
        self.avatar.send_replace(avatar);
        Ok(())
    }
}

impl Default for AvatarEditor {
    fn default() -> Self {
        Self::new(Gender::default(), SkinTone::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seeded() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn female_avatars_never_get_the_male_accessory() {
        let mut rng = seeded();
        for _ in 0..500 {
            let avatar = generate_random_avatar(&mut rng, Gender::Female, SkinTone::Mid);
            assert!(!avatar.accessories.regular.contains(&4));
            assert!(avatar.accessories.regular.len() <= 3);
        }
    }

    #[test]
    fn features_stay_within_bounds() {
        let mut rng = seeded();
        for _ in 0..500 {
            let avatar = generate_random_avatar(&mut rng, Gender::Male, SkinTone::Dark);
            assert!((1..=3).contains(&avatar.mouth));
            assert!((1..=3).contains(&avatar.eyes.option));
            assert!((1..=4).contains(&avatar.eyes.color));
            assert!((1..=4).contains(&avatar.nose));

            let mut regular = avatar.accessories.regular.clone();
            regular.sort_unstable();
            regular.dedup();
            assert_eq!(regular.len(), avatar.accessories.regular.len());
            assert!(regular.iter().all(|a| (1..=4).contains(a)));

            if let Some(hair) = avatar.hair {
                assert!((1..=3).contains(&hair.option) && (1..=5).contains(&hair.color));
            }
            if let Some(hat) = avatar.hat {
                assert!((1..=2).contains(&hat.option) && (1..=4).contains(&hat.color));
            }
        }
    }

    #[test]
    fn optional_features_show_up_at_roughly_their_rates() {
        let mut rng = seeded();
        let avatars: Vec<_> = (0..4000)
            .map(|_| generate_random_avatar(&mut rng, Gender::Male, SkinTone::Light))
            .collect();
        let rate = |hits: usize| hits as f64 / avatars.len() as f64;

        let patches = rate(avatars.iter().filter(|a| a.accessories.eye_patch.is_some()).count());
        let hair = rate(avatars.iter().filter(|a| a.hair.is_some()).count());
        let hats = rate(avatars.iter().filter(|a| a.hat.is_some()).count());

        assert!((0.25..0.35).contains(&patches), "eye patch rate {patches}");
        assert!((0.70..0.80).contains(&hair), "hair rate {hair}");
        assert!((0.62..0.72).contains(&hats), "hat rate {hats}");
    }

    #[test]
    fn serialized_avatars_read_back_equal() {
        let avatar = generate_random_avatar(&mut seeded(), Gender::Female, SkinTone::Dark);
        let raw = avatar.serialize().unwrap();
        assert_eq!(PirateAvatar::deserialize(&raw).unwrap(), avatar);
    }

    #[test]
    fn wire_shape_matches_the_vote_app() {
        let avatar = PirateAvatar {
            gender: Gender::Male,
            skin_tone: SkinTone::Mid,
            mouth: 2,
            eyes: StyleChoice { option: 1, color: 3 },
            nose: 4,
            accessories: Accessories {
                regular: vec![4, 1],
                eye_patch: Some(EyePatch::Left),
            },
            hair: None,
            hat: Some(StyleChoice { option: 2, color: 1 }),
        };

        assert_eq!(
            serde_json::to_value(&avatar).unwrap(),
            json!({
                "gender": "male",
                "skinTone": "mid",
                "mouth": 2,
                "eyes": {"option": 1, "color": 3},
                "nose": 4,
                "accessories": {"regular": [4, 1], "eyePatch": "left"},
                "hair": null,
                "hat": {"option": 2, "color": 1}
            })
        );
    }

    #[test]
    fn switching_to_female_drops_accessory_four() {
        let editor = AvatarEditor::new(Gender::Male, SkinTone::Light);
        editor.avatar.send_modify(|a| a.accessories.regular = vec![1, 4, 2]);
        let before = editor.avatar();

        editor.set_gender(Gender::Female);
        editor.set_skin_tone(SkinTone::Dark);

        let after = editor.avatar();
        assert_eq!(after.accessories.regular, vec![1, 2]);
        assert_eq!(after.skin_tone, SkinTone::Dark);
        assert_eq!(after.mouth, before.mouth);
        assert_eq!(after.hat, before.hat);
    }

    #[test]
    fn randomize_takes_gender_and_skin_tone_overrides() {
        let editor = AvatarEditor::new(Gender::Male, SkinTone::Light);

        editor.randomize(None, None);
        assert_eq!(editor.avatar().gender, Gender::Male);
        assert_eq!(editor.avatar().skin_tone, SkinTone::Light);

        editor.randomize(Some(Gender::Female), None);
        assert_eq!(editor.avatar().gender, Gender::Female);
        assert_eq!(editor.avatar().skin_tone, SkinTone::Light);

        editor.randomize(None, Some(SkinTone::Dark));
        let avatar = editor.avatar();
        assert_eq!(avatar.gender, Gender::Female);
        assert_eq!(avatar.skin_tone, SkinTone::Dark);
        assert!(!avatar.accessories.regular.contains(&4));
    }

    #[test]
    fn load_replaces_the_avatar() {
        let editor = AvatarEditor::default();
        let other = generate_random_avatar(&mut seeded(), Gender::Female, SkinTone::Mid);

        editor.load(&other.serialize().unwrap()).unwrap();
        assert_eq!(editor.avatar(), other);
        assert!(editor.load("{\"gender\":").is_err());
        assert_eq!(editor.avatar(), other);
    }

    #[tokio::test(start_paused = true)]
    async fn spin_yields_every_phase_then_settles() {
        let started = tokio::time::Instant::now();
        let frames: Vec<_> = spin_frames(Gender::Male, SkinTone::Mid).collect().await;

        assert_eq!(frames.len(), 8 + 6 + 4 + 3 + 1);
        assert!(frames.iter().all(|f| f.gender == Gender::Male && f.skin_tone == SkinTone::Mid));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(2200) && elapsed < Duration::from_millis(2300));
    }

    #[tokio::test(start_paused = true)]
    async fn spinning_twice_at_once_is_a_no_op() {
        let editor = AvatarEditor::new(Gender::Female, SkinTone::Light);

        let (first, second) =
            tokio::join!(editor.spin_and_randomize(), editor.spin_and_randomize());

        assert!(first);
        assert!(!second);
        assert!(!editor.is_spinning());
        assert_eq!(editor.avatar().gender, Gender::Female);
    }
}

//! Face regions: coarse groupings used to narrow prompt candidates.
//!
//! Membership is a keyword heuristic. It never decides whether a value may be stored.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ParamError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaceRegion {
    Eyes,
    Nose,
    Jaw,
    Cheeks,
    Mouth,
    Forehead,
    FaceShape,
    All,
}

impl FaceRegion {
    /// Classification order. Cheeks come before eyes so `cheekSquint_L` lands in cheeks.
    const CLASSIFY_ORDER: [FaceRegion; 6] = [
        FaceRegion::Cheeks,
        FaceRegion::Nose,
        FaceRegion::Mouth,
        FaceRegion::Jaw,
        FaceRegion::Eyes,
        FaceRegion::Forehead,
    ];

    pub const ALL_REGIONS: [FaceRegion; 8] = [
        FaceRegion::Eyes,
        FaceRegion::Nose,
        FaceRegion::Jaw,
        FaceRegion::Cheeks,
        FaceRegion::Mouth,
        FaceRegion::Forehead,
        FaceRegion::FaceShape,
        FaceRegion::All,
    ];

    /// Lowercase substrings that mark a parameter name as belonging here.
    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            FaceRegion::Eyes => &["eye", "lid", "lash", "pupil", "iris", "blink", "squint"],
            FaceRegion::Nose => &["nose", "nostril", "nasal", "sneer"],
            FaceRegion::Jaw => &["jaw", "chin", "mandible"],
            FaceRegion::Cheeks => &["cheek", "puff"],
            FaceRegion::Mouth => &[
                "mouth", "lip", "smile", "frown", "pucker", "funnel", "dimple", "teeth", "tongue",
            ],
            FaceRegion::Forehead => &["forehead", "brow", "temple"],
            FaceRegion::FaceShape => &["face", "head", "skull", "shape"],
            FaceRegion::All => &[],
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FaceRegion::Eyes => "eyes",
            FaceRegion::Nose => "nose",
            FaceRegion::Jaw => "jaw",
            FaceRegion::Cheeks => "cheeks",
            FaceRegion::Mouth => "mouth",
            FaceRegion::Forehead => "forehead",
            FaceRegion::FaceShape => "face_shape",
            FaceRegion::All => "all",
        }
    }

    /// Case-insensitive keyword match. `All` matches everything.
    pub fn matches(&self, name: &str) -> bool {
        if *self == FaceRegion::All {
            return true;
        }
        let lower = name.to_lowercase();
        self.keywords().iter().any(|keyword| lower.contains(keyword))
    }

    /// Best region for a name; unmatched names fall back to face shape.
    pub fn classify(name: &str) -> FaceRegion {
        Self::CLASSIFY_ORDER
            .into_iter()
            .find(|region| region.matches(name))
            .unwrap_or(FaceRegion::FaceShape)
    }

    /// Names from `names` that belong to this region, in input order.
    pub fn candidates<'a>(&self, names: &'a [String]) -> Vec<&'a str> {
        names
            .iter()
            .filter(|name| self.matches(name) || Self::classify(name) == *self)
            .map(String::as_str)
            .collect()
    }

    /// First specific region whose keywords appear in free text.
    pub fn detect(text: &str) -> Option<FaceRegion> {
        let lower = text.to_lowercase();
        Self::CLASSIFY_ORDER
            .into_iter()
            .chain([FaceRegion::FaceShape])
            .find(|region| {
                region
                    .keywords()
                    .iter()
                    .any(|keyword| lower.contains(keyword))
            })
    }
}

impl fmt::Display for FaceRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for FaceRegion {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let region = match s.trim().to_lowercase().as_str() {
            "eyes" | "eye" => FaceRegion::Eyes,
            "nose" => FaceRegion::Nose,
            "jaw" | "chin" | "jaw_chin" => FaceRegion::Jaw,
            "cheeks" | "cheek" => FaceRegion::Cheeks,
            "mouth" | "lips" | "lip" | "mouth_lips" => FaceRegion::Mouth,
            "forehead" | "brow" | "brows" => FaceRegion::Forehead,
            "face_shape" | "face" | "shape" | "faceshape" => FaceRegion::FaceShape,
            "all" => FaceRegion::All,
            other => return Err(ParamError::UnknownRegion(other.to_string())),
        };
        Ok(region)
    }
}

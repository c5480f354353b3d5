//! Patient details shared read-only by every session in a run.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Date-of-birth wire format (`DDMMYYYY`).
pub const DOB_FORMAT: &str = "%d%m%Y";

/// Minimum number of digits in a Medicare number once separators are stripped.
pub const MIN_MEDICARE_DIGITS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sex {
    #[serde(rename = "M")]
    Male,
    #[serde(rename = "F")]
    Female,
    #[serde(rename = "I")]
    Intersex,
}

impl Sex {
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Male => "M",
            Self::Female => "F",
            Self::Intersex => "I",
        }
    }
}

impl FromStr for Sex {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "M" => Ok(Self::Male),
            "F" => Ok(Self::Female),
            "I" => Ok(Self::Intersex),
            _ => Err(InputError::InvalidSex(s.to_string())),
        }
    }
}

/// A patient field a provider may require before its session can start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    FamilyName,
    GivenName,
    Dob,
    MedicareNumber,
    Sex,
}

impl Field {
    pub const ALL: [Field; 5] = [
        Field::FamilyName,
        Field::GivenName,
        Field::Dob,
        Field::MedicareNumber,
        Field::Sex,
    ];

    /// Human-readable label used in prompts and diagnostics.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::FamilyName => "Family Name",
            Self::GivenName => "Given Name",
            Self::Dob => "Date of Birth (DDMMYYYY)",
            Self::MedicareNumber => "Medicare Number",
            Self::Sex => "Sex (M, F, or I)",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("{0} is required by the selected providers")]
    MissingField(Field),

    #[error("Date of birth must be a valid date in DDMMYYYY format, got '{0}'")]
    InvalidDob(String),

    #[error("Medicare number must contain at least {MIN_MEDICARE_DIGITS} digits, got '{0}'")]
    InvalidMedicareNumber(String),

    #[error("Sex must be 'M', 'F', or 'I', got '{0}'")]
    InvalidSex(String),
}

impl InputError {
    /// The field the error is about.
    #[must_use]
    pub fn field(&self) -> Field {
        match self {
            Self::MissingField(field) => *field,
            Self::InvalidDob(_) => Field::Dob,
            Self::InvalidMedicareNumber(_) => Field::MedicareNumber,
            Self::InvalidSex(_) => Field::Sex,
        }
    }
}

/// Unvalidated patient details as collected from flags, prompts, or a form.
///
/// Blank strings are treated as absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTaskInput {
    pub family_name: Option<String>,
    pub given_name: Option<String>,
    pub dob: Option<String>,
    pub medicare_number: Option<String>,
    pub sex: Option<String>,
}

impl RawTaskInput {
    /// Value currently held for a field, if non-blank.
    #[must_use]
    pub fn get(&self, field: Field) -> Option<&str> {
        let value = match field {
            Field::FamilyName => &self.family_name,
            Field::GivenName => &self.given_name,
            Field::Dob => &self.dob,
            Field::MedicareNumber => &self.medicare_number,
            Field::Sex => &self.sex,
        };
        non_blank(value.as_deref())
    }

    pub fn set(&mut self, field: Field, value: String) {
        let slot = match field {
            Field::FamilyName => &mut self.family_name,
            Field::GivenName => &mut self.given_name,
            Field::Dob => &mut self.dob,
            Field::MedicareNumber => &mut self.medicare_number,
            Field::Sex => &mut self.sex,
        };
        *slot = Some(value);
    }

    pub fn validate(self) -> Result<TaskInput, InputError> {
        let dob = match non_blank(self.dob.as_deref()) {
            Some(dob) => Some(parse_dob(dob)?),
            None => None,
        };

        let medicare_number = match non_blank(self.medicare_number.as_deref()) {
            Some(raw) => {
                let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
                if digits.len() < MIN_MEDICARE_DIGITS {
                    return Err(InputError::InvalidMedicareNumber(raw.to_string()));
                }
                Some(digits)
            }
            None => None,
        };

        let sex = non_blank(self.sex.as_deref())
            .map(str::parse::<Sex>)
            .transpose()?;

        Ok(TaskInput {
            family_name: non_blank(self.family_name.as_deref()).map(str::to_string),
            given_name: non_blank(self.given_name.as_deref()).map(str::to_string),
            dob,
            medicare_number,
            sex,
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Strictly parse a `DDMMYYYY` date of birth.
pub fn parse_dob(value: &str) -> Result<NaiveDate, InputError> {
    let value = value.trim();
    // chrono accepts unpadded day/month, the wire format does not
    if value.len() != 8 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(InputError::InvalidDob(value.to_string()));
    }
    NaiveDate::parse_from_str(value, DOB_FORMAT).map_err(|_| InputError::InvalidDob(value.to_string()))
}

/// Validated patient details. Immutable once constructed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskInput {
    family_name: Option<String>,
    given_name: Option<String>,
    dob: Option<NaiveDate>,
    medicare_number: Option<String>,
    sex: Option<Sex>,
}

impl TaskInput {
    #[must_use]
    pub fn family_name(&self) -> Option<&str> {
        self.family_name.as_deref()
    }

    #[must_use]
    pub fn given_name(&self) -> Option<&str> {
        self.given_name.as_deref()
    }

    #[must_use]
    pub fn dob(&self) -> Option<NaiveDate> {
        self.dob
    }

    /// Medicare number, digits only.
    #[must_use]
    pub fn medicare_number(&self) -> Option<&str> {
        self.medicare_number.as_deref()
    }

    #[must_use]
    pub fn sex(&self) -> Option<Sex> {
        self.sex
    }

    /// Date of birth rendered with a chrono format string, e.g. `%d/%m/%Y`.
    #[must_use]
    pub fn dob_formatted(&self, format: &str) -> Option<String> {
        self.dob.map(|d| d.format(format).to_string())
    }

    #[must_use]
    pub fn has(&self, field: Field) -> bool {
        match field {
            Field::FamilyName => self.family_name.is_some(),
            Field::GivenName => self.given_name.is_some(),
            Field::Dob => self.dob.is_some(),
            Field::MedicareNumber => self.medicare_number.is_some(),
            Field::Sex => self.sex.is_some(),
        }
    }

    /// Fail with the first required field that is absent.
    pub fn require<'a>(&self, fields: impl IntoIterator<Item = &'a Field>) -> Result<(), InputError> {
        match fields.into_iter().find(|f| !self.has(**f)) {
            Some(field) => Err(InputError::MissingField(*field)),
            None => Ok(()),
        }
    }

    /// Flags that reproduce this input on the command line.
    #[must_use]
    pub fn to_cli_args(&self) -> String {
        let mut flags = Vec::new();
        let mut push = |flag: &str, value: String| {
            if value.contains(char::is_whitespace) {
                flags.push(format!("--{flag} \"{value}\""));
            } else {
                flags.push(format!("--{flag} {value}"));
            }
        };

        if let Some(ref name) = self.family_name {
            push("family-name", name.clone());
        }
        if let Some(ref name) = self.given_name {
            push("given-name", name.clone());
        }
        if let Some(dob) = self.dob_formatted(DOB_FORMAT) {
            push("dob", dob);
        }
        if let Some(ref number) = self.medicare_number {
            push("medicare-number", number.clone());
        }
        if let Some(sex) = self.sex {
            push("sex", sex.code().to_string());
        }
        flags.join(" ")
    }
}

/// Back to editable form, so a follow-up run can fill in fields the first
/// one did not need.
impl From<&TaskInput> for RawTaskInput {
    fn from(input: &TaskInput) -> Self {
        Self {
            family_name: input.family_name.clone(),
            given_name: input.given_name.clone(),
            dob: input.dob_formatted(DOB_FORMAT),
            medicare_number: input.medicare_number.clone(),
            sex: input.sex.map(|s| s.code().to_string()),
        }
    }
}

/// Wire form handed to external adapters (dob in `DDMMYYYY`).
impl Serialize for TaskInput {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let mut s = serializer.serialize_struct("TaskInput", 5)?;
        s.serialize_field("family_name", &self.family_name)?;
        s.serialize_field("given_name", &self.given_name)?;
        s.serialize_field("dob", &self.dob_formatted(DOB_FORMAT))?;
        s.serialize_field("medicare_number", &self.medicare_number)?;
        s.serialize_field("sex", &self.sex)?;
        s.end()
    }
}

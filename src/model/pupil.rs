//! Pupil records as entered by the instructor.

use serde::{Deserialize, Serialize};

/// A pupil whose driving test is being monitored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PupilRecord {
    pub name: String,
    pub licence_number: String,
    pub email: String,
    pub phone: String,
    pub test_centre: String,
    pub postcode: String,
}

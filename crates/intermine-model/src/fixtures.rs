use std::sync::Arc;

use crate::Model;

/// The raw JSON of the test model.
pub const TEST_MODEL_JSON: &str = include_str!("../testdata/testmodel.json");

/// The test model: employees, departments and companies, plus a few genomic classes.
pub fn test_model() -> Arc<Model> {
    // The fixture is checked in; a parse failure is a bug in the fixture.
    Arc::new(Model::from_json(TEST_MODEL_JSON).expect("test model fixture is valid"))
}

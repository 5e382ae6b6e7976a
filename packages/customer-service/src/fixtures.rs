//! Randomized customers for tests.

use rand::Rng;
use uuid::Uuid;

use crate::customer::Customer;

const FIRST_NAMES: &[&str] = &["Ada", "Grace", "Linus", "Barbara", "Ken", "Margaret", "Dennis"];
const LAST_NAMES: &[&str] = &["Lovelace", "Hopper", "Torvalds", "Liskov", "Thompson", "Hamilton"];

/// Builds customers with random data for the fields the caller leaves open.
#[derive(Debug, Clone, Default)]
pub struct CustomerBuilder {
    id: Option<String>,
    name: Option<String>,
    null_email: bool,
}

impl CustomerBuilder {
    /// A customer with a random id, name, email and rating.
    pub fn customer_with_name() -> Self {
        Self::default()
    }

    pub fn customer_with_id_and_name(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    /// A customer whose email is explicitly absent.
    pub fn customer_with_name_but_email_is_null() -> Self {
        Self {
            null_email: true,
            ..Self::default()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn create(self) -> Customer {
        let mut rng = rand::thread_rng();
        let id = self.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let name = self.name.unwrap_or_else(|| {
            format!(
                "{} {}",
                FIRST_NAMES[rng.gen_range(0..FIRST_NAMES.len())],
                LAST_NAMES[rng.gen_range(0..LAST_NAMES.len())]
            )
        });
        let email = (!self.null_email).then(|| {
            format!(
                "{}.{}@example.com",
                name.to_lowercase().replace(' ', "."),
                rng.gen_range(100..10_000)
            )
        });

        Customer {
            id,
            name: Some(name),
            email,
            rating: Some(rng.gen_range(1..=5)),
        }
    }
}

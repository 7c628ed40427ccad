//! In-memory gateway for `--demo` runs and screenshots
//!
//! Every generated address gets its own seeded inbox. Calls can be slowed
//! down so optimistic updates are visible, and mutations can be made to fail
//! periodically to exercise rollback.

use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::error::{GatewayError, Result};
use crate::gateway::Gateway;
use crate::message::{Attachment, WireId, WireMessage};
use crate::registry::Address;

const PREFIXES: [&str; 8] = [
    "temp", "disposable", "throwaway", "quick", "random", "secure", "private", "anon",
];
const DOMAINS: [&str; 5] = [
    "tempmail.io",
    "disposable.com",
    "throwaway.net",
    "quickmail.org",
    "tempinbox.me",
];

/// How long a generated demo address stays valid
const ADDRESS_LIFETIME_HOURS: i64 = 1;

struct Sample {
    from: &'static str,
    subject: &'static str,
    body: &'static str,
    minutes_ago: i64,
    read: bool,
    attachment: Option<(&'static str, &'static str, &'static str)>,
}

const SAMPLES: [Sample; 7] = [
    Sample {
        from: "notifications@github.com",
        subject: "[tempmail/tempmail] New pull request #42",
        body: "user123 opened a pull request.\n\nFix navigation bug in the message list\n\nPlease review the changes.",
        minutes_ago: 15,
        read: false,
        attachment: None,
    },
    Sample {
        from: "support@vercel.com",
        subject: "Your deployment is complete",
        body: "<p>Your project is live.</p><p>Deployment URL: <a href=\"https://example.vercel.app\">example.vercel.app</a></p>",
        minutes_ago: 45,
        read: false,
        attachment: None,
    },
    Sample {
        from: "This Week in Rust <noreply@this-week-in-rust.org>",
        subject: "This Week in Rust 542",
        body: "Hello and welcome to another issue of This Week in Rust!\n\n- Updates from the community\n- Crate of the week\n- Call for participation",
        minutes_ago: 180,
        read: true,
        attachment: None,
    },
    Sample {
        from: "billing@stripe.com",
        subject: "Your monthly receipt",
        body: "Thank you for your subscription.\n\nAmount: $15.00\nPayment method: **** 4242",
        minutes_ago: 480,
        read: true,
        attachment: Some(("receipt.pdf", "156 KB", "pdf")),
    },
    Sample {
        from: "no-reply@aws.amazon.com",
        subject: "Your AWS usage report",
        body: "Current charges: $42.50\nEstimated month-end: $78.20\n\n- EC2: $28.15\n- S3: $8.75\n- Lambda: $5.60",
        minutes_ago: 60 * 24 * 2,
        read: true,
        attachment: Some(("usage-report.csv", "24 KB", "csv")),
    },
    Sample {
        from: "Figma <no-reply@figma.com>",
        subject: "Bob commented on 'Homepage Redesign'",
        body: "Bob: Love the new hero section! Can we try a darker shade for the CTA button?",
        minutes_ago: 60 * 24 * 3,
        read: false,
        attachment: None,
    },
    Sample {
        from: "verify@accounts.example.com",
        subject: "",
        body: "Your verification code is 493021. It expires in 10 minutes.",
        minutes_ago: 2,
        read: false,
        attachment: None,
    },
];

#[derive(Default)]
struct DemoState {
    /// Inbox per address, in the order the gateway lists them
    inboxes: HashMap<String, Vec<WireMessage>>,
}

impl DemoState {
    fn find_mut(&mut self, id: &str) -> Option<(&String, &mut Vec<WireMessage>, usize)> {
        self.inboxes.iter_mut().find_map(|(email, inbox)| {
            let index = inbox.iter().position(|m| m.id.to_string() == id)?;
            Some((&*email, inbox, index))
        })
    }
}

pub struct DemoGateway {
    state: Mutex<DemoState>,
    next_id: AtomicU64,
    generated: AtomicUsize,
    mutations: AtomicUsize,
    latency: Duration,
    /// Every nth set-read or delete fails with 503
    fail_every: Option<usize>,
}

impl Default for DemoGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl DemoGateway {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DemoState::default()),
            next_id: AtomicU64::new(1),
            generated: AtomicUsize::new(0),
            mutations: AtomicUsize::new(0),
            latency: Duration::ZERO,
            fail_every: None,
        }
    }

    /// Delays every call by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Makes every `n`th mutation fail. Zero disables failures.
    pub fn with_failures_every(mut self, n: usize) -> Self {
        self.fail_every = (n > 0).then_some(n);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DemoState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn next_address(&self) -> String {
        let n = self.generated.fetch_add(1, Ordering::SeqCst);
        let prefix = PREFIXES[n % PREFIXES.len()];
        let domain = DOMAINS[n % DOMAINS.len()];
        format!("{prefix}{}@{domain}", 1000 + n * 37)
    }

    fn seed_inbox(&self) -> Vec<WireMessage> {
        let now = Utc::now();
        SAMPLES
            .iter()
            .map(|sample| WireMessage {
                id: WireId::Number(self.next_id.fetch_add(1, Ordering::SeqCst)),
                from_address: sample.from.to_string(),
                subject: Some(sample.subject.to_string()),
                body: Some(sample.body.to_string()),
                body_html: None,
                body_plain: None,
                received_at: (now - ChronoDuration::minutes(sample.minutes_ago)).to_rfc3339(),
                read_at: sample.read.then(|| now.to_rfc3339()),
                attachments: sample
                    .attachment
                    .map(|(name, size, hint)| Attachment {
                        name: name.to_string(),
                        size: size.to_string(),
                        hint: Some(hint.to_string()),
                    })
                    .into_iter()
                    .collect(),
            })
            .collect()
    }

    /// Counts a mutation and decides whether this one should fail
    fn check_failure(&self) -> Result<()> {
        let count = self.mutations.fetch_add(1, Ordering::SeqCst) + 1;
        match self.fail_every {
            Some(n) if count % n == 0 => Err(GatewayError::new(
                503,
                "API error: Service temporarily unavailable",
            )),
            _ => Ok(()),
        }
    }
}

impl Gateway for DemoGateway {
    async fn generate_address(&self) -> Result<Address> {
        self.simulate_latency().await;

        let email = self.next_address();
        let inbox = self.seed_inbox();
        self.lock().inboxes.insert(email.clone(), inbox);

        crate::debug_log!("demo: generated {}", email);
        Ok(Address::new(email).with_expiry(Utc::now() + ChronoDuration::hours(ADDRESS_LIFETIME_HOURS)))
    }

    async fn list_messages(&self, email: &str) -> Result<Vec<WireMessage>> {
        self.simulate_latency().await;
        Ok(self.lock().inboxes.get(email).cloned().unwrap_or_default())
    }

    async fn set_read(&self, message_id: &str, read: bool) -> Result<()> {
        self.simulate_latency().await;
        self.check_failure()?;

        let mut state = self.lock();
        let (_, inbox, index) = state
            .find_mut(message_id)
            .ok_or_else(|| GatewayError::new(404, "API error: Message not found"))?;
        inbox[index].read_at = read.then(|| Utc::now().to_rfc3339());
        Ok(())
    }

    async fn delete_message(&self, message_id: &str) -> Result<()> {
        self.simulate_latency().await;
        self.check_failure()?;

        let mut state = self.lock();
        let (email, inbox, index) = state
            .find_mut(message_id)
            .ok_or_else(|| GatewayError::new(404, "API error: Message not found"))?;
        crate::debug_log!("demo: deleted {} from {}", message_id, email);
        inbox.remove(index);
        Ok(())
    }
}

use std::str::FromStr;

use serde::Serialize;
use utoipa::ToSchema;

use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSlug {
    Home,
    Pricing,
    About,
    Legal,
}

impl PageSlug {
    pub const ALL: [PageSlug; 4] = [
        PageSlug::Home,
        PageSlug::Pricing,
        PageSlug::About,
        PageSlug::Legal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PageSlug::Home => "home",
            PageSlug::Pricing => "pricing",
            PageSlug::About => "about",
            PageSlug::Legal => "legal",
        }
    }
}

impl FromStr for PageSlug {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PageSlug::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("no page named {s}"))
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, ToSchema)]
pub struct Section {
    pub heading: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, ToSchema)]
pub struct PricingPlan {
    pub name: String,
    pub price_pln: u32,
    pub period: String,
    pub sessions_per_week: Option<u8>,
    pub features: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, ToSchema)]
pub struct Contact {
    pub address: String,
    pub email: String,
    pub phone: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub map_url: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, ToSchema)]
pub struct Page {
    pub slug: String,
    pub title: String,
    pub summary: String,
    pub sections: Vec<Section>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub plans: Vec<PricingPlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<Contact>,
}

fn section(heading: &str, body: &str) -> Section {
    Section {
        heading: heading.to_string(),
        body: body.to_string(),
    }
}

fn plan(
    name: &str,
    price_pln: u32,
    period: &str,
    sessions_per_week: Option<u8>,
    features: &[&str],
) -> PricingPlan {
    PricingPlan {
        name: name.to_string(),
        price_pln,
        period: period.to_string(),
        sessions_per_week,
        features: features.iter().map(|f| f.to_string()).collect(),
    }
}

pub fn pricing_plans() -> Vec<PricingPlan> {
    vec![
        plan("Drop-in", 50, "session", None, &["Any group class", "Gloves on loan"]),
        plan(
            "Fighter 2x",
            220,
            "month",
            Some(2),
            &["Two group classes a week", "Open gym access"],
        ),
        plan(
            "Unlimited",
            320,
            "month",
            None,
            &["Unlimited group classes", "Open gym access", "Sparring sessions"],
        ),
        plan(
            "Personal training",
            150,
            "session",
            None,
            &["One-on-one with a trainer", "Individual plan"],
        ),
    ]
}

pub fn contact(settings: &Settings) -> Contact {
    let (lat, lon) = (settings.gym_latitude, settings.gym_longitude);
    Contact {
        address: settings.gym_location.clone(),
        email: settings.contact_email.clone(),
        phone: settings.contact_phone.clone(),
        latitude: lat,
        longitude: lon,
        map_url: format!("https://www.openstreetmap.org/?mlat={lat}&mlon={lon}#map=17/{lat}/{lon}"),
    }
}

pub fn render(slug: PageSlug, settings: &Settings) -> Page {
    let title = &settings.gym_title;
    match slug {
        PageSlug::Home => Page {
            slug: slug.as_str().into(),
            title: title.clone(),
            summary: "Boxing classes for every level, from first jab to first fight.".into(),
            sections: vec![
                section(
                    "Train with us",
                    "Group classes run every weekday evening and on Saturday mornings. Book your spot online once your account is approved.",
                ),
                section(
                    "First visit",
                    "Sign the training waiver in your account before your first class. Gloves and wraps are available on loan.",
                ),
            ],
            plans: Vec::new(),
            contact: Some(contact(settings)),
        },
        PageSlug::Pricing => Page {
            slug: slug.as_str().into(),
            title: format!("{title}: pricing"),
            summary: "Memberships and single entries. Prices in PLN, VAT included.".into(),
            sections: vec![section(
                "Payment",
                "Memberships are paid at the front desk at the start of each month.",
            )],
            plans: pricing_plans(),
            contact: None,
        },
        PageSlug::About => Page {
            slug: slug.as_str().into(),
            title: format!("About {title}"),
            summary: "A neighbourhood boxing gym run by coaches who still spar.".into(),
            sections: vec![
                section(
                    "Coaches",
                    "Our trainers hold national federation licences and coach both recreational and competing boxers.",
                ),
                section(
                    "The gym",
                    "Full-size ring, bag area, strength corner and changing rooms with showers.",
                ),
            ],
            plans: Vec::new(),
            contact: Some(contact(settings)),
        },
        PageSlug::Legal => Page {
            slug: slug.as_str().into(),
            title: format!("{title}: terms and privacy"),
            summary: "Terms of membership and how we handle your data.".into(),
            sections: vec![
                section(
                    "Training waiver",
                    "Boxing is a contact sport. By signing the waiver you confirm you are fit to train and accept the associated risk.",
                ),
                section(
                    "Bookings",
                    "A booking holds one spot in a class. Cancel it from your account if you cannot attend.",
                ),
                section(
                    "Personal data",
                    &format!(
                        "We store your name, e-mail address, bookings and signed waiver to run the gym. Contact {} to access or delete your data.",
                        settings.contact_email
                    ),
                ),
            ],
            plans: Vec::new(),
            contact: None,
        },
    }
}

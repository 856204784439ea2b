//! Menu email composition.

use chrono::{Datelike, NaiveDate};
use reqwest::Url;

/// Content-ID the HTML body uses to reference the inline image.
pub const MENU_IMAGE_CID: &str = "menu-image";

/// A composed, transport-agnostic menu email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuEmail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
    pub image: Vec<u8>,
    pub image_filename: String,
}

/// Links into the menu calendar web view.
#[derive(Debug, Clone, Default)]
pub struct MenuLinks {
    base_url: String,
}

impl MenuLinks {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim().trim_end_matches('/').to_string(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty()
    }

    /// `<base>/?date=YYYY-MM-DD`, keeping any path on the base URL.
    pub fn calendar_link(&self, date: NaiveDate) -> Option<String> {
        if !self.is_configured() {
            return None;
        }
        match Url::parse(&self.base_url) {
            Ok(mut url) => {
                url.set_query(Some(&format!("date={}", date)));
                Some(url.to_string())
            }
            Err(err) => {
                tracing::debug!("Ignoring unparseable MENU_WEB_BASE_URL {}: {}", self.base_url, err);
                None
            }
        }
    }

    pub fn image_url(&self, date: NaiveDate) -> Option<String> {
        self.is_configured()
            .then(|| format!("{}/api/image/{}", self.base_url, date))
    }
}

/// Short human date, e.g. `Mon 8 Jan`.
pub fn display_date(date: NaiveDate) -> String {
    format!("{} {} {}", date.format("%a"), date.day(), date.format("%b"))
}

pub fn subject_for(date: NaiveDate) -> String {
    format!("School menu - {}", display_date(date))
}

/// Build the email for `date` around the already-read image bytes.
pub fn compose(
    date: NaiveDate,
    from: &str,
    to: Vec<String>,
    links: &MenuLinks,
    image: Vec<u8>,
    image_filename: &str,
) -> MenuEmail {
    let link = links.calendar_link(date);

    let mut text_body = format!("School menu for {} is attached.", date);
    if let Some(link) = &link {
        text_body.push_str(&format!("\nView in browser: {}", link));
    }

    let mut html_body = format!(
        "<html><body><img src=\"cid:{}\" alt=\"School menu\"><p>School menu for {}.</p>",
        MENU_IMAGE_CID,
        display_date(date)
    );
    if let Some(link) = &link {
        html_body.push_str(&format!("<p><a href=\"{}\">Open calendar view</a></p>", link));
    }
    html_body.push_str("</body></html>");

    MenuEmail {
        from: from.to_string(),
        to,
        subject: subject_for(date),
        text_body,
        html_body,
        image,
        image_filename: image_filename.to_string(),
    }
}

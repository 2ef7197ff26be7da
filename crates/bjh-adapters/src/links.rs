//! Fallback job-board search URLs.

use bjh_core::SearchLinks;

use crate::normalize::strip_html;

/// Search URLs that find a posting by title, company and location on the
/// major boards. Used when a source gives no stable direct link.
pub fn generate_search_links(title: &str, company: &str, location: &str) -> SearchLinks {
    let title = strip_html(title);
    let company = strip_html(company);
    let location = strip_html(location);

    let query = [title.as_str(), company.as_str()]
        .into_iter()
        .filter(|part| !part.is_empty() && *part != "Unknown")
        .collect::<Vec<_>>()
        .join(" ");
    let q = urlencoding::encode(&query);
    let l = urlencoding::encode(&location);
    let google_query = format!("{query} {location} jobs");

    SearchLinks {
        indeed: format!("https://www.indeed.com/jobs?q={q}&l={l}"),
        google: format!(
            "https://www.google.com/search?q={}",
            urlencoding::encode(google_query.trim())
        ),
        linkedin: format!("https://www.linkedin.com/jobs/search/?keywords={q}&location={l}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn links_encode_title_company_and_location() {
        let links = generate_search_links("Lab Tech", "Acme & Co", "New York, NY");
        assert_eq!(
            links.indeed,
            "https://www.indeed.com/jobs?q=Lab%20Tech%20Acme%20%26%20Co&l=New%20York%2C%20NY"
        );
        assert_eq!(
            links.linkedin,
            "https://www.linkedin.com/jobs/search/?keywords=Lab%20Tech%20Acme%20%26%20Co&location=New%20York%2C%20NY"
        );
        assert_eq!(
            links.google,
            "https://www.google.com/search?q=Lab%20Tech%20Acme%20%26%20Co%20New%20York%2C%20NY%20jobs"
        );
    }

    #[test]
    fn unknown_company_is_left_out_of_the_query() {
        let links = generate_search_links("<b>Research Aide</b>", "Unknown", "Newark, NJ");
        assert!(links.indeed.starts_with("https://www.indeed.com/jobs?q=Research%20Aide&l="));
    }
}

//! Outbound link maintenance for the active set.

use bjh_adapters::generate_search_links;
use bjh_core::Job;

/// Adds `searchLinks` where missing. Adzuna redirect links expire quickly, so
/// Adzuna jobs, and any job without a link, point at the Indeed search URL.
pub fn backfill_links(jobs: &mut [Job]) {
    for job in jobs {
        let links = job
            .search_links
            .get_or_insert_with(|| generate_search_links(&job.title, &job.company, &job.location));
        let broken_adzuna = job.id.starts_with("adzuna-") && job.link.contains("adzuna.");
        if job.link.trim().is_empty() || broken_adzuna {
            job.link = links.indeed.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::job;

    #[test]
    fn missing_search_links_are_generated() {
        let mut jobs = vec![job("static-1", "Lab Technician", "Acme Bio", "New York, NY")];
        jobs[0].link = "https://acme.example/careers".into();
        backfill_links(&mut jobs);
        let links = jobs[0].search_links.clone().unwrap();
        assert!(links.google.starts_with("https://www.google.com/search?q="));
        assert_eq!(jobs[0].link, "https://acme.example/careers");
    }

    #[test]
    fn adzuna_redirects_are_replaced() {
        let mut jobs = vec![job("adzuna-42", "Lab Technician", "Acme Bio", "New York, NY")];
        jobs[0].link = "https://www.adzuna.com/land/ad/42".into();
        backfill_links(&mut jobs);
        assert!(jobs[0].link.starts_with("https://www.indeed.com/jobs?q="));
    }

    #[test]
    fn existing_search_links_are_kept() {
        let mut j = job("rss-x-1", "Lab Technician", "Acme Bio", "New York, NY");
        let mut custom = generate_search_links("Other", "Co", "Boston, MA");
        custom.indeed = "https://indeed.example/custom".into();
        j.search_links = Some(custom.clone());
        let mut jobs = vec![j];
        backfill_links(&mut jobs);
        assert_eq!(jobs[0].search_links, Some(custom));
        assert_eq!(jobs[0].link, "https://indeed.example/custom");
    }
}

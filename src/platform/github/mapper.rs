use crate::platform::types;

/// Map octocrab Issue to our Ticket type.
pub fn map_ticket(issue: &octocrab::models::issues::Issue) -> types::Ticket {
    types::Ticket {
        number: issue.number,
        title: issue.title.clone(),
        body: issue.body.clone().unwrap_or_default(),
        author: issue.user.login.clone(),
    }
}

pub fn map_comment_id(comment: &octocrab::models::issues::Comment) -> types::CommentId {
    types::CommentId(comment.id.into_inner())
}

pub fn map_pull_request(pr: &octocrab::models::pulls::PullRequest) -> types::PullRequest {
    types::PullRequest {
        number: pr.number,
        url: pr
            .html_url
            .as_ref()
            .map(|u| u.to_string())
            .unwrap_or_default(),
    }
}

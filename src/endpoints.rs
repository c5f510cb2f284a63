//! Endpoint paths, relative to the configured base URL
//!
//! Ids are percent-encoded so they always stay a single path segment.

pub mod auth {
    pub const REGISTER: &str = "/auth/register";
    pub const LOGIN: &str = "/auth/login";
    pub const LOGOUT: &str = "/auth/logout";
    pub const REFRESH: &str = "/auth/refresh";
    pub const VERIFY_TOKEN: &str = "/auth/verify-token";
    pub const CHECK_USERNAME: &str = "/auth/check-username";
    pub const CHECK_EMAIL: &str = "/auth/check-email";
}

pub mod users {
    use urlencoding::encode;

    pub const PROFILE: &str = "/users/profile";
    pub const AVATAR: &str = "/users/avatar";

    pub fn user(user_id: &str) -> String {
        format!("/users/{}", encode(user_id))
    }
}

pub mod memories {
    use urlencoding::encode;

    pub const CREATE: &str = "/memories";
    pub const NEARBY: &str = "/memories/nearby";
    pub const FEED: &str = "/memories/feed";
    pub const SEARCH: &str = "/memories/search";

    pub fn memory(memory_id: &str) -> String {
        format!("/memories/{}", encode(memory_id))
    }

    pub fn by_user(user_id: &str) -> String {
        format!("/memories/user/{}", encode(user_id))
    }
}

pub mod interactions {
    use urlencoding::encode;

    pub fn like(memory_id: &str) -> String {
        format!("/interactions/{}/like", encode(memory_id))
    }

    pub fn unlike(memory_id: &str) -> String {
        format!("/interactions/{}/unlike", encode(memory_id))
    }

    pub fn comment(memory_id: &str) -> String {
        format!("/interactions/{}/comment", encode(memory_id))
    }

    pub fn comments(memory_id: &str) -> String {
        format!("/interactions/{}/comments", encode(memory_id))
    }

    pub fn report(memory_id: &str) -> String {
        format!("/interactions/{}/report", encode(memory_id))
    }
}

pub mod geospatial {
    pub const MEMORIES_IN_AREA: &str = "/geospatial/memories-in-area";
    pub const POPULAR_LOCATIONS: &str = "/geospatial/popular-locations";
}

pub mod uploads {
    use urlencoding::encode;

    pub const MEDIA: &str = "/uploads/media";

    pub fn media(media_id: &str) -> String {
        format!("/uploads/media/{}", encode(media_id))
    }
}

pub const HEALTH: &str = "/health";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_paths() {
        assert_eq!(memories::memory("m1"), "/memories/m1");
        assert_eq!(memories::by_user("u9"), "/memories/user/u9");
        assert_eq!(interactions::unlike("m1"), "/interactions/m1/unlike");
        assert_eq!(uploads::media("x"), "/uploads/media/x");
    }

    #[test]
    fn ids_cannot_change_the_route() {
        assert_eq!(memories::memory("a/b?c"), "/memories/a%2Fb%3Fc");
        assert_eq!(users::user("../admin"), "/users/..%2Fadmin");
        assert_eq!(interactions::like("m 1#x"), "/interactions/m%201%23x/like");
    }
}

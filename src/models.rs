use serde::{Deserialize, Serialize};

pub const POSTER_BASE: &str = "https://image.tmdb.org/t/p/w500";

/// Display name for a catalog genre id, for the genres the app knows about.
pub fn genre_name(id: i32) -> Option<&'static str> {
    let name = match id {
        28 => "Action",
        18 => "Drama",
        35 => "Comedy",
        878 => "Sci-Fi",
        _ => return None,
    };
    Some(name)
}

/// Catalog genre id for a user-facing genre tag.
pub fn genre_id(tag: &str) -> Option<i32> {
    let id = match tag {
        "Action" => 28,
        "Drama" => 18,
        "Comedy" => 35,
        "Sci-Fi" => 878,
        _ => return None,
    };
    Some(id)
}

/// A movie as returned in catalog list results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieRecord {
    pub id: i32,
    #[serde(default)]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub release_date: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub poster_path: String,
    #[serde(default)]
    pub genre_ids: Vec<i32>,
    #[serde(rename = "vote_average", alias = "rating", default)]
    pub rating: f64,
}

impl MovieRecord {
    /// Known genre names in catalog order. Unknown ids are skipped.
    pub fn genre_names(&self) -> Vec<&'static str> {
        self.genre_ids.iter().filter_map(|id| genre_name(*id)).collect()
    }

    pub fn genre_label(&self) -> String {
        let names = self.genre_names();
        if names.is_empty() {
            "N/A".to_string()
        } else {
            names.join(", ")
        }
    }

    pub fn poster_url(&self) -> Option<String> {
        if self.poster_path.is_empty() {
            None
        } else {
            Some(format!("{POSTER_BASE}{}", self.poster_path))
        }
    }

    /// Year from the first four characters of the release date, if numeric.
    pub fn release_year(&self) -> Option<i32> {
        self.release_date.get(..4).and_then(|y| y.parse().ok())
    }
}

/// One page of discover or search results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogPage {
    pub page: u32,
    pub total_pages: u32,
    #[serde(default)]
    pub results: Vec<MovieRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetailGenre {
    pub id: i32,
    pub name: String,
}

/// Response of the single-movie detail endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct MovieDetail {
    pub id: i32,
    #[serde(default)]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub release_date: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub poster_path: String,
    pub genres: Option<Vec<DetailGenre>>,
    #[serde(default)]
    pub vote_average: f64,
}

impl MovieDetail {
    pub fn into_record(self) -> MovieRecord {
        MovieRecord {
            id: self.id,
            title: self.title,
            release_date: self.release_date,
            poster_path: self.poster_path,
            genre_ids: self
                .genres
                .map(|g| g.into_iter().map(|x| x.id).collect())
                .unwrap_or_default(),
            rating: self.vote_average,
        }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn genre_label_skips_unknown_ids_and_falls_back_to_na() {
        let mut movie = MovieRecord {
            id: 1,
            title: "Heat".to_string(),
            release_date: "1995-12-15".to_string(),
            poster_path: String::new(),
            genre_ids: vec![28, 80, 18],
            rating: 7.9,
        };
        assert_eq!(movie.genre_label(), "Action, Drama");
        movie.genre_ids = vec![80, 53];
        assert_eq!(movie.genre_label(), "N/A");
    }

    #[test]
    fn deserializes_list_result_with_null_poster() {
        let value = json!({
            "id": 603,
            "title": "The Matrix",
            "release_date": "1999-03-30",
            "poster_path": null,
            "genre_ids": [28, 878],
            "vote_average": 8.2,
            "popularity": 91.3
        });
        let movie: MovieRecord = serde_json::from_value(value).expect("movie deserialize");
        assert_eq!(movie.poster_path, "");
        assert_eq!(movie.poster_url(), None);
        assert_eq!(movie.genre_names(), vec!["Action", "Sci-Fi"]);
        assert_eq!(movie.release_year(), Some(1999));
    }

    #[test]
    fn detail_maps_genre_objects_to_ids() {
        let value = json!({
            "id": 27205,
            "title": "Inception",
            "release_date": "2010-07-15",
            "poster_path": "/inception.jpg",
            "genres": [{ "id": 28, "name": "Action" }, { "id": 878, "name": "Science Fiction" }],
            "vote_average": 8.4
        });
        let detail: MovieDetail = serde_json::from_value(value).expect("detail deserialize");
        let record = detail.into_record();
        assert_eq!(record.genre_ids, vec![28, 878]);
        assert_eq!(record.rating, 8.4);
        assert_eq!(
            record.poster_url().as_deref(),
            Some("https://image.tmdb.org/t/p/w500/inception.jpg")
        );
    }

    #[test]
    fn partial_release_date_has_no_year_when_short() {
        let movie = MovieRecord {
            id: 2,
            title: "Untitled".to_string(),
            release_date: "19".to_string(),
            poster_path: String::new(),
            genre_ids: vec![],
            rating: 0.0,
        };
        assert_eq!(movie.release_year(), None);
    }

    #[test]
    fn tag_and_id_tables_agree() {
        for tag in ["Action", "Drama", "Comedy", "Sci-Fi"] {
            let id = genre_id(tag).expect("known tag");
            assert_eq!(genre_name(id), Some(tag));
        }
        assert_eq!(genre_id("Horror"), None);
    }
}

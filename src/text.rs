/// Lowercases, trims, collapses inner whitespace and strips Latin diacritics
/// so that `" Tamanho "`, `"tamanho"` and `"TAMANHO"` compare equal.
pub fn fold(s: &str) -> String {
    s.split_whitespace()
        .flat_map(|word| {
            word.chars()
                .flat_map(char::to_lowercase)
                .map(strip_diacritic)
                .chain(std::iter::once(' '))
        })
        .collect::<String>()
        .trim_end()
        .to_string()
}

fn strip_diacritic(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'ç' => 'c',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ñ' => 'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ý' | 'ÿ' => 'y',
        c => c,
    }
}

pub fn same_label(a: &str, b: &str) -> bool {
    fold(a) == fold(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_ignores_case_space_and_accents() {
        assert_eq!(fold("  Referência  Duplicada "), "referencia duplicada");
        assert!(same_label(" m ", "M"));
        assert!(same_label("TAMANHO", "tamanho"));
        assert!(!same_label("M", "XL"));
    }
}
